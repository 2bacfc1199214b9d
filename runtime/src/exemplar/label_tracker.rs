use std::collections::BTreeSet;

/// Union of the label names seen across all exemplars of a response, in sorted order.
#[derive(Debug, Default)]
pub struct LabelTracker {
    names: BTreeSet<String>,
}

impl LabelTracker {
    pub fn add<'a, I>(&mut self, names: I)
    where
        I: IntoIterator<Item = &'a String>,
    {
        for name in names {
            if !self.names.contains(name) {
                self.names.insert(name.clone());
            }
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
