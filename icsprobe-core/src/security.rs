//! OPC-UA security parameters

use crate::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// OPC-UA security policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SecurityPolicy {
    #[default]
    None,
    Basic128Rsa15,
    Basic256,
    Basic256Sha256,
}

impl SecurityPolicy {
    /// Standard policy URI sent in the OpenSecureChannel security header
    pub fn uri(&self) -> &'static str {
        match self {
            SecurityPolicy::None => "http://opcfoundation.org/UA/SecurityPolicy#None",
            SecurityPolicy::Basic128Rsa15 => {
                "http://opcfoundation.org/UA/SecurityPolicy#Basic128Rsa15"
            }
            SecurityPolicy::Basic256 => "http://opcfoundation.org/UA/SecurityPolicy#Basic256",
            SecurityPolicy::Basic256Sha256 => {
                "http://opcfoundation.org/UA/SecurityPolicy#Basic256Sha256"
            }
        }
    }

    /// Does this policy require client certificate material?
    pub fn requires_certificate(&self) -> bool {
        !matches!(self, SecurityPolicy::None)
    }
}

impl FromStr for SecurityPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "None" => Ok(SecurityPolicy::None),
            "Basic128Rsa15" => Ok(SecurityPolicy::Basic128Rsa15),
            "Basic256" => Ok(SecurityPolicy::Basic256),
            "Basic256Sha256" => Ok(SecurityPolicy::Basic256Sha256),
            other => Err(Error::invalid_parameter(
                "security_policy",
                format!(
                    "unknown policy '{other}' (expected None, Basic128Rsa15, Basic256, or Basic256Sha256)"
                ),
            )),
        }
    }
}

impl fmt::Display for SecurityPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SecurityPolicy::None => "None",
            SecurityPolicy::Basic128Rsa15 => "Basic128Rsa15",
            SecurityPolicy::Basic256 => "Basic256",
            SecurityPolicy::Basic256Sha256 => "Basic256Sha256",
        };
        write!(f, "{}", name)
    }
}

/// OPC-UA message security mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageSecurityMode {
    #[default]
    None,
    Sign,
    SignAndEncrypt,
}

impl MessageSecurityMode {
    /// Wire encoding used in OpenSecureChannel requests
    pub fn wire_value(&self) -> u32 {
        match self {
            MessageSecurityMode::None => 1,
            MessageSecurityMode::Sign => 2,
            MessageSecurityMode::SignAndEncrypt => 3,
        }
    }
}

impl FromStr for MessageSecurityMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "None" => Ok(MessageSecurityMode::None),
            "Sign" => Ok(MessageSecurityMode::Sign),
            "SignAndEncrypt" => Ok(MessageSecurityMode::SignAndEncrypt),
            other => Err(Error::invalid_parameter(
                "security_mode",
                format!("unknown mode '{other}' (expected None, Sign, or SignAndEncrypt)"),
            )),
        }
    }
}

impl fmt::Display for MessageSecurityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageSecurityMode::None => "None",
            MessageSecurityMode::Sign => "Sign",
            MessageSecurityMode::SignAndEncrypt => "SignAndEncrypt",
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_round_trip() {
        for name in ["None", "Basic128Rsa15", "Basic256", "Basic256Sha256"] {
            let policy: SecurityPolicy = name.parse().unwrap();
            assert_eq!(policy.to_string(), name);
        }
    }

    #[test]
    fn test_policy_uri() {
        let policy: SecurityPolicy = "Basic256Sha256".parse().unwrap();
        assert!(policy.uri().ends_with("#Basic256Sha256"));
        assert!(policy.requires_certificate());
        assert!(!SecurityPolicy::None.requires_certificate());
    }

    #[test]
    fn test_unknown_policy_rejected() {
        assert!("Basic512".parse::<SecurityPolicy>().is_err());
    }

    #[test]
    fn test_mode_wire_values() {
        assert_eq!(MessageSecurityMode::None.wire_value(), 1);
        assert_eq!(MessageSecurityMode::Sign.wire_value(), 2);
        assert_eq!(MessageSecurityMode::SignAndEncrypt.wire_value(), 3);
    }
}
