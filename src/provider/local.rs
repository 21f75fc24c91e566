//! In-process resources: random strings and credential bundles

use async_trait::async_trait;
use rand::distributions::Slice;
use rand::Rng;

use super::{ProviderRequest, ResourceProvider};
use crate::graph::ResourceKind;
use crate::kubeconfig::CredentialComposer;
use crate::output::OutputAttributes;
use crate::{Error, Result};

const LOWER: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const UPPER: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGITS: &[u8] = b"0123456789";
const SPECIAL: &[u8] = b"!#$%&*()-_=+[]{}<>:?";

/// Character classes for a random string
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Charset {
    /// A-Z
    pub upper: bool,
    /// 0-9
    pub numeric: bool,
    /// Punctuation
    pub special: bool,
}

impl Charset {
    /// Read the classes from a request; each defaults to enabled
    pub fn from_request(request: &ProviderRequest) -> Self {
        Self {
            upper: request.bool_or("upper", true),
            numeric: request.bool_or("numeric", true),
            special: request.bool_or("special", true),
        }
    }

    /// Alphabet the string is drawn from
    pub fn alphabet(&self) -> Vec<u8> {
        let mut chars = LOWER.to_vec();
        if self.upper {
            chars.extend_from_slice(UPPER);
        }
        if self.numeric {
            chars.extend_from_slice(DIGITS);
        }
        if self.special {
            chars.extend_from_slice(SPECIAL);
        }
        chars
    }
}

/// Generate a random string of `length` characters
pub fn random_string(length: usize, charset: Charset) -> Result<String> {
    let alphabet = charset.alphabet();
    let dist = Slice::new(&alphabet).map_err(|_| Error::validation("empty alphabet"))?;
    Ok(rand::thread_rng()
        .sample_iter(dist)
        .take(length)
        .map(|&b| b as char)
        .collect())
}

/// Provider for [`ResourceKind::RandomString`] and [`ResourceKind::Kubeconfig`]
#[derive(Debug, Default, Clone)]
pub struct LocalProvider;

impl LocalProvider {
    /// Create a local provider
    pub fn new() -> Self {
        Self
    }

    fn random(request: &ProviderRequest) -> Result<OutputAttributes> {
        let length = request.u64_or("length", 16)?;
        if length == 0 {
            return Err(Error::validation(format!("{} length must be positive", request.id)));
        }
        let result = random_string(length as usize, Charset::from_request(request))?;
        Ok(if request.bool_or("secret", false) {
            OutputAttributes::new().with_secret("result", result)
        } else {
            OutputAttributes::new().with("result", result)
        })
    }

    fn kubeconfig(request: &ProviderRequest) -> Result<OutputAttributes> {
        let composer =
            CredentialComposer::new(request.str_field("project")?, request.str_field("zone")?);
        let bundle = composer.compose(
            request.str_field("clusterName")?,
            request.str_field("endpoint")?,
            request.str_field("clusterCaCertificate")?,
        )?;
        Ok(OutputAttributes::new()
            .with("context", bundle.context)
            .with_secret("kubeconfig", bundle.kubeconfig))
    }
}

#[async_trait]
impl ResourceProvider for LocalProvider {
    async fn create(&self, request: &ProviderRequest) -> Result<OutputAttributes> {
        match request.kind() {
            ResourceKind::RandomString => Self::random(request),
            ResourceKind::Kubeconfig => Self::kubeconfig(request),
            other => Err(Error::validation(format!("{other} is not a local resource kind"))),
        }
    }

    async fn delete(&self, _request: &ProviderRequest, _outputs: &OutputAttributes) -> Result<()> {
        Ok(())
    }
}
