//! Bucket identity: `(name, provider, namespace)`.
//!
//! Two buckets are equal iff all three parts are equal. The display
//! encoding is `provider://[namespace/]name`; the on-disk namespace
//! encoding is `@uuid#name`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Separator between provider and the rest of the display form.
pub const PROVIDER_SEPARATOR: &str = "://";

/// On-disk namespace UUID prefix. Part of the disk layout, do not change.
pub const NS_UUID_PREFIX: char = '@';
/// On-disk namespace name prefix. Part of the disk layout, do not change.
pub const NS_NAME_PREFIX: char = '#';

/// Storage backend provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Provider {
    /// Native cluster buckets.
    Ais,
    /// Amazon S3.
    Aws,
    /// Google Cloud Storage.
    Gcp,
    /// Azure Blob Storage.
    Azure,
}

impl Provider {
    /// All valid providers.
    pub const ALL: [Provider; 4] = [Provider::Ais, Provider::Aws, Provider::Gcp, Provider::Azure];

    /// The canonical lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Ais => "ais",
            Provider::Aws => "aws",
            Provider::Gcp => "gcp",
            Provider::Azure => "azure",
        }
    }

    /// Parse a provider name.
    pub fn parse(s: &str) -> Option<Provider> {
        Provider::ALL.iter().copied().find(|p| p.as_str() == s)
    }

    /// Whether this provider denotes a cloud backend.
    pub fn is_cloud(&self) -> bool {
        !matches!(self, Provider::Ais)
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Namespace scoping data under the same provider.
///
/// The UUID refers to a remote cluster; the name distinguishes datasets
/// under the same UUID. `("", "")` is the global namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ns {
    /// UUID of the owning remote cluster, empty for the global namespace.
    pub uuid: String,

    /// Name under the UUID; used in building object paths.
    pub name: String,
}

impl Ns {
    /// The global namespace.
    pub fn global() -> Ns {
        Ns::default()
    }

    /// Create a namespace from its parts.
    pub fn new(uuid: impl Into<String>, name: impl Into<String>) -> Ns {
        Ns {
            uuid: uuid.into(),
            name: name.into(),
        }
    }

    /// Whether this is the global namespace.
    pub fn is_global(&self) -> bool {
        self.uuid.is_empty() && self.name.is_empty()
    }

    /// On-disk encoding `@uuid#name`.
    pub fn uname(&self) -> String {
        format!("{}{}{}{}", NS_UUID_PREFIX, self.uuid, NS_NAME_PREFIX, self.name)
    }

    /// Parse the on-disk encoding `[@uuid][#name]`.
    pub fn parse_uname(s: &str) -> Ns {
        let s = s.strip_prefix(NS_UUID_PREFIX).unwrap_or(s);
        match s.find(NS_NAME_PREFIX) {
            Some(idx) => Ns::new(&s[..idx], &s[idx + 1..]),
            None => Ns::new(s, ""),
        }
    }

    /// Validate the namespace components.
    pub fn validate(&self) -> Result<(), String> {
        if !ns_component_ok(&self.uuid) || !ns_component_ok(&self.name) {
            return Err(format!(
                "namespace (uuid: {:?}, name: {:?}) may only contain letters, numbers, dashes and underscores",
                self.uuid, self.name
            ));
        }
        Ok(())
    }
}

impl fmt::Display for Ns {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_global() {
            return Ok(());
        }
        if !self.uuid.is_empty() {
            write!(f, "{}{}", NS_UUID_PREFIX, self.uuid)?;
        }
        if !self.name.is_empty() {
            write!(f, "{}{}", NS_NAME_PREFIX, self.name)?;
        }
        Ok(())
    }
}

fn ns_component_ok(s: &str) -> bool {
    s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn bucket_name_ok(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
}

/// Bucket identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Bck {
    /// Bucket name.
    pub name: String,

    /// Backend provider.
    pub provider: Provider,

    /// Namespace, global unless scoped to a remote cluster.
    pub ns: Ns,
}

impl Bck {
    /// Create a bucket in the global namespace.
    pub fn new(name: impl Into<String>, provider: Provider) -> Bck {
        Bck {
            name: name.into(),
            provider,
            ns: Ns::global(),
        }
    }

    /// Create a namespaced bucket.
    pub fn with_ns(name: impl Into<String>, provider: Provider, ns: Ns) -> Bck {
        Bck {
            name: name.into(),
            provider,
            ns,
        }
    }

    /// Whether the bucket is hosted by a cloud provider.
    pub fn is_cloud(&self) -> bool {
        self.provider.is_cloud()
    }

    /// Whether the bucket is native to this cluster.
    pub fn is_ais(&self) -> bool {
        self.provider == Provider::Ais && self.ns.uuid.is_empty()
    }

    /// Validate name, provider, and namespace.
    pub fn validate(&self) -> Result<(), String> {
        if !bucket_name_ok(&self.name) {
            return Err(format!(
                "bucket name {:?} must be non-empty and contain only letters, numbers, '.', '-', '_'",
                self.name
            ));
        }
        self.ns.validate()
    }

    /// Canonical per-object identity string, used as the lock key.
    pub fn make_uname(&self, objname: &str) -> String {
        format!("{}/{}", self, objname)
    }
}

impl fmt::Display for Bck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ns.is_global() {
            write!(f, "{}{}{}", self.provider, PROVIDER_SEPARATOR, self.name)
        } else {
            write!(f, "{}{}{}/{}", self.provider, PROVIDER_SEPARATOR, self.ns, self.name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_roundtrip() {
        for p in Provider::ALL {
            assert_eq!(Provider::parse(p.as_str()), Some(p));
        }
        assert_eq!(Provider::parse("s3"), None);
        assert!(Provider::Aws.is_cloud());
        assert!(!Provider::Ais.is_cloud());
    }

    #[test]
    fn test_ns_uname_roundtrip() {
        let ns = Ns::new("c1u2", "imagenet");
        assert_eq!(ns.uname(), "@c1u2#imagenet");
        assert_eq!(Ns::parse_uname(&ns.uname()), ns);

        let global = Ns::global();
        assert!(global.is_global());
        assert_eq!(Ns::parse_uname("@#"), global);
    }

    #[test]
    fn test_ns_parse_partial() {
        assert_eq!(Ns::parse_uname("@uuid"), Ns::new("uuid", ""));
        assert_eq!(Ns::parse_uname("#name"), Ns::new("", "name"));
    }

    #[test]
    fn test_display_forms() {
        let b = Bck::new("imagenet", Provider::Aws);
        assert_eq!(b.to_string(), "aws://imagenet");

        let scoped = Bck::with_ns("training", Provider::Ais, Ns::new("c1", "team"));
        assert_eq!(scoped.to_string(), "ais://@c1#team/training");
    }

    #[test]
    fn test_equality_all_three_parts() {
        let a = Bck::new("b", Provider::Ais);
        let b = Bck::new("b", Provider::Aws);
        let c = Bck::with_ns("b", Provider::Ais, Ns::new("u", ""));
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, Bck::new("b", Provider::Ais));
    }

    #[test]
    fn test_validate() {
        assert!(Bck::new("ok-bucket_1.x", Provider::Gcp).validate().is_ok());
        assert!(Bck::new("", Provider::Gcp).validate().is_err());
        assert!(Bck::new("no/slash", Provider::Gcp).validate().is_err());
        assert!(Bck::with_ns("b", Provider::Ais, Ns::new("bad uuid", ""))
            .validate()
            .is_err());
    }

    #[test]
    fn test_make_uname() {
        let b = Bck::new("imagenet", Provider::Aws);
        assert_eq!(b.make_uname("train/001.tar"), "aws://imagenet/train/001.tar");
    }
}
