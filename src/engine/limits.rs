// src/engine/limits.rs
//
// Input limits applied before decoding (byte size) and after reading the
// header (pixel count). The hard safety limits in engine.rs always apply;
// these are the configurable, policy-driven ones on top.

use crate::error::{ImagePixError, Result};
use std::str::FromStr;

const STRICT_MAX_PIXELS: u64 = 40_000_000; // ~8K x 5K
const LENIENT_MAX_PIXELS: u64 = 75_000_000; // generous but below global MAX_PIXELS
const STRICT_MAX_BYTES: u64 = 32 * 1024 * 1024; // 32MB input cap
const LENIENT_MAX_BYTES: u64 = 48 * 1024 * 1024; // 48MB input cap

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum LimitPolicy {
    #[default]
    Disabled,
    Strict,
    Lenient,
    Custom,
}

impl FromStr for LimitPolicy {
    type Err = ImagePixError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "disabled" | "off" | "none" => Ok(Self::Disabled),
            "strict" => Ok(Self::Strict),
            "lenient" => Ok(Self::Lenient),
            "custom" => Ok(Self::Custom),
            other => Err(ImagePixError::invalid_limit_policy(other.to_string())),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct LimitConfig {
    pub policy: LimitPolicy,
    pub max_pixels: Option<u64>,
    pub max_bytes: Option<u64>,
}

impl LimitConfig {
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn strict() -> Self {
        Self {
            policy: LimitPolicy::Strict,
            max_pixels: Some(STRICT_MAX_PIXELS),
            max_bytes: Some(STRICT_MAX_BYTES),
        }
    }

    pub fn lenient() -> Self {
        Self {
            policy: LimitPolicy::Lenient,
            max_pixels: Some(LENIENT_MAX_PIXELS),
            max_bytes: Some(LENIENT_MAX_BYTES),
        }
    }

    /// Caller-chosen limits; `None` leaves that axis unchecked.
    pub fn custom(max_bytes: Option<u64>, max_pixels: Option<u64>) -> Self {
        Self {
            policy: LimitPolicy::Custom,
            max_pixels,
            max_bytes,
        }
    }

    pub fn apply_policy(policy: LimitPolicy) -> Self {
        match policy {
            LimitPolicy::Disabled => Self::disabled(),
            LimitPolicy::Strict => Self::strict(),
            LimitPolicy::Lenient => Self::lenient(),
            LimitPolicy::Custom => Self::custom(None, None),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.policy != LimitPolicy::Disabled
    }

    pub fn enforce_source_len(&self, len: usize) -> Result<()> {
        if !self.is_enabled() {
            return Ok(());
        }
        if let Some(limit) = self.max_bytes {
            let len_u64 = len as u64;
            if len_u64 > limit {
                return Err(ImagePixError::limit_violation(format!(
                    "input size {len_u64} bytes exceeds limit of {limit} bytes"
                )));
            }
        }
        Ok(())
    }

    pub fn enforce_pixels(&self, width: u32, height: u32) -> Result<()> {
        if !self.is_enabled() {
            return Ok(());
        }
        if let Some(limit) = self.max_pixels {
            let pixels = width as u64 * height as u64;
            if pixels > limit {
                return Err(ImagePixError::limit_violation(format!(
                    "{width}x{height} ({pixels} pixels) exceeds limit of {limit} pixels"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn strict_policy_enforces_pixels_and_bytes() {
        let cfg = LimitConfig::strict();
        assert!(cfg.enforce_pixels(2000, 2000).is_ok());
        let err = cfg.enforce_pixels(7000, 7000).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Limit);
        assert!(cfg.enforce_source_len(1024).is_ok());
        assert!(cfg
            .enforce_source_len((STRICT_MAX_BYTES + 1) as usize)
            .is_err());
    }

    #[test]
    fn lenient_is_looser_than_strict() {
        let cfg = LimitConfig::lenient();
        assert!(cfg.enforce_pixels(7000, 7000).is_ok());
        assert!(cfg.enforce_pixels(10000, 10000).is_err());
    }

    #[test]
    fn disabled_allows_everything() {
        let cfg = LimitConfig::disabled();
        assert!(cfg.enforce_pixels(u32::MAX, u32::MAX).is_ok());
        assert!(cfg.enforce_source_len(usize::MAX).is_ok());
    }

    #[test]
    fn custom_only_checks_given_axes() {
        let cfg = LimitConfig::custom(Some(10), None);
        assert!(cfg.enforce_source_len(11).is_err());
        assert!(cfg.enforce_pixels(100_000, 100_000).is_ok());
    }

    #[test]
    fn policy_parsing() {
        assert_eq!("STRICT".parse::<LimitPolicy>().unwrap(), LimitPolicy::Strict);
        assert_eq!("".parse::<LimitPolicy>().unwrap(), LimitPolicy::Disabled);
        assert!("paranoid".parse::<LimitPolicy>().is_err());
        assert_eq!(
            LimitConfig::apply_policy(LimitPolicy::Lenient),
            LimitConfig::lenient()
        );
    }
}
