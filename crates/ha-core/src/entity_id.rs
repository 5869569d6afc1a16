//! Entity ID type representing a domain.object_id pair, and the rules used
//! to derive a fresh entity id from a human readable name.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error type for invalid entity IDs
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EntityIdError {
    #[error("entity_id must contain exactly one '.' separator")]
    InvalidFormat,

    #[error("domain cannot be empty")]
    EmptyDomain,

    #[error("object_id cannot be empty")]
    EmptyObjectId,

    #[error(
        "domain contains invalid characters (must be lowercase alphanumeric with underscores, cannot start/end with underscore or contain double underscores)"
    )]
    InvalidDomainChars,

    #[error(
        "object_id contains invalid characters (must be lowercase alphanumeric with underscores, cannot start/end with underscore)"
    )]
    InvalidObjectIdChars,
}

/// Represents a Home Assistant entity ID (e.g., "remote.hue_dimmer_switch")
///
/// Entity IDs consist of a domain and an object_id separated by a period.
/// Both parts must be lowercase alphanumeric with underscores only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityId {
    domain: String,
    object_id: String,
}

impl EntityId {
    /// Create a new EntityId from domain and object_id parts
    pub fn new(
        domain: impl Into<String>,
        object_id: impl Into<String>,
    ) -> Result<Self, EntityIdError> {
        let domain = domain.into();
        let object_id = object_id.into();

        if domain.is_empty() {
            return Err(EntityIdError::EmptyDomain);
        }
        if object_id.is_empty() {
            return Err(EntityIdError::EmptyObjectId);
        }
        if domain.contains("__") || !is_slug(&domain) {
            return Err(EntityIdError::InvalidDomainChars);
        }
        if !is_slug(&object_id) {
            return Err(EntityIdError::InvalidObjectIdChars);
        }

        Ok(Self { domain, object_id })
    }

    /// Get the domain part of the entity ID
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Get the object_id part of the entity ID
    pub fn object_id(&self) -> &str {
        &self.object_id
    }
}

/// Lowercase alphanumeric + underscore, not starting or ending with `_`.
///
/// Matches Python HA regex: `(?!_)[\da-z_]+(?<!_)`
fn is_slug(s: &str) -> bool {
    !s.starts_with('_')
        && !s.ends_with('_')
        && s
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

impl FromStr for EntityId {
    type Err = EntityIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('.') {
            Some((domain, object_id)) if !object_id.contains('.') => {
                Self::new(domain, object_id)
            }
            _ => Err(EntityIdError::InvalidFormat),
        }
    }
}

impl TryFrom<String> for EntityId {
    type Error = EntityIdError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<EntityId> for String {
    fn from(id: EntityId) -> String {
        id.to_string()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.domain, self.object_id)
    }
}

/// Turn a display name into an object_id
///
/// Latin accents are folded to ASCII, every run of other characters becomes
/// a single `_`, and the result is trimmed of underscores. A name with
/// nothing usable left becomes `unknown`.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_separator = false;

    for c in text.chars().flat_map(char::to_lowercase) {
        let folded = match c {
            'a'..='z' | '0'..='9' => Some(c),
            'á' | 'à' | 'â' | 'ä' | 'ã' | 'å' => Some('a'),
            'é' | 'è' | 'ê' | 'ë' => Some('e'),
            'í' | 'ì' | 'î' | 'ï' => Some('i'),
            'ó' | 'ò' | 'ô' | 'ö' | 'õ' => Some('o'),
            'ú' | 'ù' | 'û' | 'ü' => Some('u'),
            'ñ' => Some('n'),
            'ç' => Some('c'),
            _ => None,
        };

        match folded {
            Some(c) => {
                if pending_separator && !slug.is_empty() {
                    slug.push('_');
                }
                pending_separator = false;
                slug.push(c);
            }
            None => pending_separator = true,
        }
    }

    if slug.is_empty() {
        "unknown".to_string()
    } else {
        slug
    }
}

/// Generate an entity id for `domain` from a display name
///
/// `exists` reports whether an entity id is already taken; on collision the
/// object_id gets a `_2`, `_3`, ... suffix until a free one is found.
pub fn generate_entity_id(
    domain: &str,
    name: &str,
    exists: impl Fn(&str) -> bool,
) -> Result<EntityId, EntityIdError> {
    let base = slugify(name);
    let mut candidate = EntityId::new(domain, base.clone())?;

    let mut suffix = 2;
    while exists(&candidate.to_string()) {
        candidate = EntityId::new(domain, format!("{}_{}", base, suffix))?;
        suffix += 1;
    }

    Ok(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_entity_id() {
        let id = EntityId::new("remote", "living_room_dimmer").unwrap();
        assert_eq!(id.domain(), "remote");
        assert_eq!(id.object_id(), "living_room_dimmer");
        assert_eq!(id.to_string(), "remote.living_room_dimmer");
    }

    #[test]
    fn test_parse_entity_id() {
        let id: EntityId = "sensor.pvpc".parse().unwrap();
        assert_eq!(id.domain(), "sensor");
        assert_eq!(id.object_id(), "pvpc");
    }

    #[test]
    fn test_invalid_format() {
        assert_eq!(
            "no_separator".parse::<EntityId>().unwrap_err(),
            EntityIdError::InvalidFormat
        );
        assert_eq!(
            "too.many.parts".parse::<EntityId>().unwrap_err(),
            EntityIdError::InvalidFormat
        );
    }

    #[test]
    fn test_invalid_parts() {
        assert_eq!(
            ".object".parse::<EntityId>().unwrap_err(),
            EntityIdError::EmptyDomain
        );
        assert_eq!(
            "domain.".parse::<EntityId>().unwrap_err(),
            EntityIdError::EmptyObjectId
        );
        assert_eq!(
            "UPPER.case".parse::<EntityId>().unwrap_err(),
            EntityIdError::InvalidDomainChars
        );
        assert_eq!(
            "sensor._price".parse::<EntityId>().unwrap_err(),
            EntityIdError::InvalidObjectIdChars
        );
        assert_eq!(
            "my__sensor.price".parse::<EntityId>().unwrap_err(),
            EntityIdError::InvalidDomainChars
        );
        // Double underscore in object_id is allowed
        assert!("sensor.my__price".parse::<EntityId>().is_ok());
    }

    #[test]
    fn test_serde_as_string() {
        let id = EntityId::new("remote", "hall_tap").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"remote.hall_tap\"");

        let parsed: EntityId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("PVPC"), "pvpc");
        assert_eq!(slugify("Hue dimmer switch 1"), "hue_dimmer_switch_1");
        assert_eq!(slugify("  Precio  luz (€/kWh) "), "precio_luz_kwh");
        assert_eq!(slugify("Tarifa eléctrica Año"), "tarifa_electrica_ano");
        assert_eq!(slugify("pvpc_manual_sensor"), "pvpc_manual_sensor");
        assert_eq!(slugify("!!!"), "unknown");
        assert_eq!(slugify(""), "unknown");
    }

    #[test]
    fn test_generate_entity_id_free() {
        let id = generate_entity_id("sensor", "PVPC manual", |_| false).unwrap();
        assert_eq!(id.to_string(), "sensor.pvpc_manual");
    }

    #[test]
    fn test_generate_entity_id_collisions() {
        let taken = ["sensor.pvpc", "sensor.pvpc_2"];
        let id = generate_entity_id("sensor", "PVPC", |candidate| taken.contains(&candidate))
            .unwrap();
        assert_eq!(id.to_string(), "sensor.pvpc_3");
    }
}
