//! Structured view of a blob volume ID.
//!
//! Wire format: `<resourceGroup>#<accountName>#<containerName>#<discriminator>`.
//! The resource group segment may be empty (the driver's configured default
//! is used then) but its separator must still be present.

use std::fmt;
use std::str::FromStr;

use crate::error::CsiError;

/// Separator between the volume ID segments.
pub const SEPARATOR: char = '#';

/// The decoded segments of a volume ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeIdentity {
    /// `None` when the leading segment is empty.
    pub resource_group: Option<String>,
    pub account_name: String,
    pub container_name: String,
    /// Opaque uniqueness token. Everything after the third separator.
    pub discriminator: Option<String>,
}

impl VolumeIdentity {
    /// Split `id` on `#`. Fewer than three segments is a
    /// [`CsiError::MalformedIdentity`]; field contents are not validated.
    pub fn parse(id: &str) -> Result<Self, CsiError> {
        let mut segments = id.splitn(4, SEPARATOR);
        let (Some(rg), Some(account), Some(container)) =
            (segments.next(), segments.next(), segments.next())
        else {
            return Err(CsiError::MalformedIdentity {
                id: id.to_owned(),
                reason: "should at least contain two #".to_owned(),
            });
        };

        Ok(Self {
            resource_group: (!rg.is_empty()).then(|| rg.to_owned()),
            account_name: account.to_owned(),
            container_name: container.to_owned(),
            discriminator: segments.next().map(str::to_owned),
        })
    }

    /// The resource group, or `default` when the ID left it empty.
    pub fn resource_group_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.resource_group.as_deref().unwrap_or(default)
    }
}

impl FromStr for VolumeIdentity {
    type Err = CsiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for VolumeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{SEPARATOR}{}{SEPARATOR}{}",
            self.resource_group.as_deref().unwrap_or_default(),
            self.account_name,
            self.container_name
        )?;
        if let Some(discriminator) = &self.discriminator {
            write!(f, "{SEPARATOR}{discriminator}")?;
        }
        Ok(())
    }
}
