use std::time::Duration;

use serde::{Deserialize, Deserializer};
use url::Url;

use promsource_common::duration::parse_interval;

use crate::runtime_error::{RuntimeError, RuntimeResult};

pub const DEFAULT_SCRAPE_INTERVAL: &str = "15s";
pub const DEFAULT_CONCURRENT_QUERY_COUNT: usize = 10;

/// HTTP method used for query requests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum HttpMethod {
    #[strum(serialize = "GET")]
    Get,
    #[default]
    #[strum(serialize = "POST")]
    Post,
}

impl HttpMethod {
    pub fn as_reqwest(&self) -> reqwest::Method {
        match self {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
        }
    }
}

impl<'de> Deserialize<'de> for HttpMethod {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let method = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
        if method.eq_ignore_ascii_case("GET") {
            Ok(HttpMethod::Get)
        } else {
            Ok(HttpMethod::Post)
        }
    }
}

/// Strategy used to thin out exemplars before they are returned.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SamplerKind {
    #[default]
    #[serde(alias = "standardDeviation", alias = "")]
    StdDev,
    Uniform,
    #[serde(alias = "noop")]
    None,
}

/// Settings of a single datasource as stored in its JSON settings blob.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DatasourceSettings {
    pub url: String,
    pub time_interval: String,
    pub http_method: HttpMethod,
    pub query_timeout: Option<String>,
    pub exemplar_sampler: SamplerKind,
    pub disable_exemplar_sampling: bool,
    pub wide_frames: bool,
    pub concurrent_query_count: usize,
    pub custom_query_parameters: String,
}

impl Default for DatasourceSettings {
    fn default() -> Self {
        Self {
            url: String::new(),
            time_interval: DEFAULT_SCRAPE_INTERVAL.to_string(),
            http_method: HttpMethod::Post,
            query_timeout: None,
            exemplar_sampler: SamplerKind::StdDev,
            disable_exemplar_sampling: false,
            wide_frames: false,
            concurrent_query_count: DEFAULT_CONCURRENT_QUERY_COUNT,
            custom_query_parameters: String::new(),
        }
    }
}

impl DatasourceSettings {
    /// Decodes and validates a settings blob.
    pub fn from_json(raw: &[u8]) -> RuntimeResult<Self> {
        let settings: DatasourceSettings = serde_json::from_slice(raw)
            .map_err(|e| RuntimeError::InvalidConfiguration(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> RuntimeResult<()> {
        self.base_url()?;
        self.query_timeout()?;
        Ok(())
    }

    pub fn base_url(&self) -> RuntimeResult<Url> {
        Url::parse(&self.url)
            .map_err(|e| RuntimeError::InvalidConfiguration(format!("url {:?}: {e}", self.url)))
    }

    pub fn query_timeout(&self) -> RuntimeResult<Option<Duration>> {
        match self.query_timeout.as_deref() {
            None | Some("") => Ok(None),
            Some(s) => parse_interval(s)
                .map(Some)
                .map_err(|e| RuntimeError::InvalidConfiguration(format!("queryTimeout: {e}"))),
        }
    }

    pub fn sampler_kind(&self) -> SamplerKind {
        if self.disable_exemplar_sampling {
            SamplerKind::None
        } else {
            self.exemplar_sampler
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrent_query_count.max(1)
    }

    /// Extra `key=value` pairs appended to every backend request.
    pub fn custom_query_params(&self) -> Vec<(String, String)> {
        url::form_urlencoded::parse(self.custom_query_parameters.as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }
}
