//! E2E protection configuration.

/// Per-call configuration for E2E protect/validate.
#[derive(Debug, Clone)]
pub struct E2eConfig {
    /// Profile selected by numeric id (0 = reference profile).
    pub profile_id: u32,
    /// Fallback lookup by name if the id is not registered.
    pub profile_name: String,
    /// Data id for counter/freshness bookkeeping; also carried in the header.
    pub data_id: u16,
    /// Byte offset from the Return Code at which the header begins.
    pub offset: u32,
    /// Compute and verify the CRC.
    pub enable_crc: bool,
    /// Maintain a per-data-id counter and check the sequence.
    pub enable_counter: bool,
    /// Stamp and check the freshness timestamp.
    pub enable_freshness: bool,
    /// Counter rollover point.
    pub max_counter_value: u32,
    /// Staleness threshold in milliseconds.
    pub freshness_timeout_ms: u32,
    /// CRC type: 0 = CRC-8 SAE-J1850, 1 = CRC-16 CCITT, 2 = CRC-32.
    pub crc_type: u8,
}

impl E2eConfig {
    /// Create a configuration for `data_id` with the defaults.
    pub fn new(data_id: u16) -> Self {
        Self {
            data_id,
            ..Self::default()
        }
    }
}

impl Default for E2eConfig {
    fn default() -> Self {
        Self {
            profile_id: 0,
            profile_name: "basic".to_string(),
            data_id: 0,
            offset: 8,
            enable_crc: true,
            enable_counter: true,
            enable_freshness: true,
            max_counter_value: 0xFFFF_FFFF,
            freshness_timeout_ms: 1000,
            crc_type: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = E2eConfig::default();
        assert_eq!(config.profile_id, 0);
        assert_eq!(config.profile_name, "basic");
        assert_eq!(config.offset, 8);
        assert!(config.enable_crc);
        assert!(config.enable_counter);
        assert!(config.enable_freshness);
        assert_eq!(config.max_counter_value, 0xFFFF_FFFF);
        assert_eq!(config.freshness_timeout_ms, 1000);
        assert_eq!(config.crc_type, 1);
    }

    #[test]
    fn test_new_sets_data_id() {
        let config = E2eConfig::new(0x4242);
        assert_eq!(config.data_id, 0x4242);
        assert_eq!(config.crc_type, 1);
    }
}
