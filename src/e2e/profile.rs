//! E2E profile trait, process-wide registry and protection facade.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use crate::error::{Result, SomeIpError};
use crate::message::SomeIpMessage;

use super::basic::BasicProfile;
use super::config::E2eConfig;

/// An E2E protection profile.
///
/// Implementations keep their own per-data-id state behind interior
/// synchronization; `protect` and `validate` may be called concurrently
/// from multiple threads.
pub trait E2eProfile: Send + Sync {
    /// Protect a message: compute the configured checks and install the
    /// E2E header.
    fn protect(&self, message: &mut SomeIpMessage, config: &E2eConfig) -> Result<()>;

    /// Validate a previously protected message.
    fn validate(&self, message: &SomeIpMessage, config: &E2eConfig) -> Result<()>;

    /// Size in bytes of the header this profile installs.
    fn header_size(&self) -> usize;

    /// Profile name for registry lookup.
    fn name(&self) -> &str;

    /// Numeric profile id for registry lookup.
    fn profile_id(&self) -> u32;
}

/// Process-wide E2E profile registry keyed by id and by name.
///
/// Lookups take a short-held mutex so dynamic registration is safe
/// concurrently with use.
pub struct E2eProfileRegistry {
    inner: Mutex<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    by_id: HashMap<u32, Arc<dyn E2eProfile>>,
    by_name: HashMap<String, Arc<dyn E2eProfile>>,
}

impl E2eProfileRegistry {
    fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner::default()),
        }
    }

    /// Register a profile. Fails if its id or name is already taken.
    pub fn register(&self, profile: Arc<dyn E2eProfile>) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let id = profile.profile_id();
        let name = profile.name().to_string();

        if inner.by_id.contains_key(&id) || inner.by_name.contains_key(&name) {
            return false;
        }

        inner.by_id.insert(id, Arc::clone(&profile));
        inner.by_name.insert(name, profile);
        true
    }

    /// Remove a profile by id, releasing both registry entries.
    pub fn unregister(&self, profile_id: u32) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.by_id.remove(&profile_id) {
            Some(profile) => {
                let name = profile.name().to_string();
                inner.by_name.remove(&name);
                true
            }
            None => false,
        }
    }

    /// Look up a profile by numeric id.
    pub fn get(&self, profile_id: u32) -> Option<Arc<dyn E2eProfile>> {
        self.inner.lock().unwrap().by_id.get(&profile_id).cloned()
    }

    /// Look up a profile by name.
    pub fn get_by_name(&self, name: &str) -> Option<Arc<dyn E2eProfile>> {
        self.inner.lock().unwrap().by_name.get(name).cloned()
    }

    /// Check whether an id is registered.
    pub fn is_registered(&self, profile_id: u32) -> bool {
        self.inner.lock().unwrap().by_id.contains_key(&profile_id)
    }

    /// The default profile (id 0).
    pub fn default_profile(&self) -> Option<Arc<dyn E2eProfile>> {
        self.get(0)
    }
}

/// The process-wide registry, created on first use with the reference
/// profile pre-registered.
pub fn registry() -> &'static E2eProfileRegistry {
    static REGISTRY: OnceLock<E2eProfileRegistry> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let registry = E2eProfileRegistry::new();
        registry.register(Arc::new(BasicProfile::new()));
        registry
    })
}

/// Entry points for protecting and validating messages.
///
/// The profile is resolved by id, then by name, then the default; if none
/// resolves the operation fails with `NotInitialized`.
pub struct E2eProtection;

impl E2eProtection {
    fn resolve(config: &E2eConfig) -> Result<Arc<dyn E2eProfile>> {
        let registry = registry();
        registry
            .get(config.profile_id)
            .or_else(|| registry.get_by_name(&config.profile_name))
            .or_else(|| registry.default_profile())
            .ok_or(SomeIpError::NotInitialized)
    }

    /// Protect `message` using the configured profile.
    pub fn protect(message: &mut SomeIpMessage, config: &E2eConfig) -> Result<()> {
        Self::resolve(config)?.protect(message, config)
    }

    /// Validate `message` using the configured profile.
    pub fn validate(message: &SomeIpMessage, config: &E2eConfig) -> Result<()> {
        Self::resolve(config)?.validate(message, config)
    }

    /// The E2E header carried by `message`, if any.
    pub fn extract_header(message: &SomeIpMessage) -> Option<super::header::E2eHeader> {
        message.e2e_header
    }

    /// Whether `message` carries E2E protection.
    pub fn has_e2e_protection(message: &SomeIpMessage) -> bool {
        message.has_e2e_header()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DummyProfile {
        id: u32,
        name: &'static str,
    }

    impl E2eProfile for DummyProfile {
        fn protect(&self, _message: &mut SomeIpMessage, _config: &E2eConfig) -> Result<()> {
            Ok(())
        }
        fn validate(&self, _message: &SomeIpMessage, _config: &E2eConfig) -> Result<()> {
            Ok(())
        }
        fn header_size(&self) -> usize {
            12
        }
        fn name(&self) -> &str {
            self.name
        }
        fn profile_id(&self) -> u32 {
            self.id
        }
    }

    #[test]
    fn test_basic_profile_preregistered() {
        let registry = registry();
        assert!(registry.is_registered(0));
        let profile = registry.default_profile().unwrap();
        assert_eq!(profile.name(), "basic");
        assert_eq!(profile.header_size(), 12);
        assert!(registry.get_by_name("basic").is_some());
    }

    #[test]
    fn test_register_collisions() {
        let registry = registry();
        assert!(registry.register(Arc::new(DummyProfile {
            id: 9001,
            name: "dummy-9001",
        })));
        // Same id
        assert!(!registry.register(Arc::new(DummyProfile {
            id: 9001,
            name: "dummy-other",
        })));
        // Same name
        assert!(!registry.register(Arc::new(DummyProfile {
            id: 9002,
            name: "dummy-9001",
        })));

        assert!(registry.unregister(9001));
        assert!(!registry.unregister(9001));
        assert!(registry.get_by_name("dummy-9001").is_none());
    }

    #[test]
    fn test_resolution_falls_back_to_default() {
        // Unknown id and name resolve to the default profile
        let config = E2eConfig {
            profile_id: 0xFFFF_0001,
            profile_name: "no-such-profile".to_string(),
            ..E2eConfig::default()
        };
        let profile = E2eProtection::resolve(&config).unwrap();
        assert_eq!(profile.profile_id(), 0);
    }

    #[test]
    fn test_facade_protect_validate() {
        use crate::header::{MethodId, ServiceId};

        let mut msg = SomeIpMessage::request(ServiceId(0x0042), MethodId(0x0001))
            .payload_vec(vec![0xCA, 0xFE])
            .build();
        let config = E2eConfig::new(0x9A00);

        assert!(!E2eProtection::has_e2e_protection(&msg));
        E2eProtection::protect(&mut msg, &config).unwrap();
        assert!(E2eProtection::has_e2e_protection(&msg));
        assert_eq!(E2eProtection::extract_header(&msg).unwrap().data_id, 0x9A00);
        E2eProtection::validate(&msg, &config).unwrap();
    }

    #[test]
    fn test_resolution_by_name() {
        let registry = registry();
        registry.register(Arc::new(DummyProfile {
            id: 9100,
            name: "dummy-by-name",
        }));
        let config = E2eConfig {
            profile_id: 0xFFFF_0002,
            profile_name: "dummy-by-name".to_string(),
            ..E2eConfig::default()
        };
        let profile = E2eProtection::resolve(&config).unwrap();
        assert_eq!(profile.profile_id(), 9100);
        registry.unregister(9100);
    }
}
