//! Crypto keys as host objects.
//!
//! A [`CryptoKey`] cannot be cloned structurally. [`CryptoKeyHook`] claims it
//! during encoding and writes two sub-values: the algorithm name, then the
//! key exported as a JSON Web Key. Decoding reads both back and imports the
//! key through the same [`KeyBackend`].

use crate::error::KeyError;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use sibling_codec::{CloneError, Deserializer, HostObject, HostObjectHook, Serializer, Value};
use std::any::Any;
use std::sync::Arc;

pub const CRYPTO_KEY_TAG: &str = "CryptoKey";

/// A symmetric key handle. The raw material never leaves the process except
/// through [`KeyBackend::export_jwk`].
#[derive(Clone, PartialEq, Eq)]
pub struct CryptoKey {
    pub algorithm: String,
    pub extractable: bool,
    pub usages: Vec<String>,
    material: Vec<u8>,
}

impl std::fmt::Debug for CryptoKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoKey")
            .field("algorithm", &self.algorithm)
            .field("extractable", &self.extractable)
            .field("usages", &self.usages)
            .finish_non_exhaustive()
    }
}

impl CryptoKey {
    pub fn new(
        algorithm: impl Into<String>,
        extractable: bool,
        usages: Vec<String>,
        material: Vec<u8>,
    ) -> Self {
        Self {
            algorithm: algorithm.into(),
            extractable,
            usages,
            material,
        }
    }

    pub fn material(&self) -> &[u8] {
        &self.material
    }
}

impl HostObject for CryptoKey {
    fn type_name(&self) -> &'static str {
        CRYPTO_KEY_TAG
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn host_eq(&self, other: &dyn HostObject) -> bool {
        other.as_any().downcast_ref::<CryptoKey>() == Some(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonWebKey {
    pub kty: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub k: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ext: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_ops: Option<Vec<String>>,
}

/// Export and import of key material.
pub trait KeyBackend: Send + Sync {
    fn export_jwk(&self, key: &CryptoKey) -> Result<JsonWebKey, KeyError>;

    fn import_jwk(&self, algorithm: &str, jwk: JsonWebKey) -> Result<CryptoKey, KeyError>;
}

/// Octet-sequence JWKs with base64url key material.
#[derive(Debug, Default, Clone, Copy)]
pub struct JwkKeyBackend;

impl KeyBackend for JwkKeyBackend {
    fn export_jwk(&self, key: &CryptoKey) -> Result<JsonWebKey, KeyError> {
        if !key.extractable {
            return Err(KeyError::NotExtractable);
        }
        Ok(JsonWebKey {
            kty: "oct".to_string(),
            k: Some(URL_SAFE_NO_PAD.encode(&key.material)),
            alg: None,
            ext: Some(true),
            key_ops: Some(key.usages.clone()),
        })
    }

    fn import_jwk(&self, algorithm: &str, jwk: JsonWebKey) -> Result<CryptoKey, KeyError> {
        if jwk.kty != "oct" {
            return Err(KeyError::UnsupportedKeyType(jwk.kty));
        }
        let encoded = jwk
            .k
            .ok_or_else(|| KeyError::InvalidKeyMaterial("missing 'k' member".to_string()))?;
        let material = URL_SAFE_NO_PAD
            .decode(encoded.trim_end_matches('='))
            .map_err(|e| KeyError::InvalidKeyMaterial(e.to_string()))?;
        if material.is_empty() {
            return Err(KeyError::InvalidKeyMaterial("empty key".to_string()));
        }
        Ok(CryptoKey {
            algorithm: algorithm.to_string(),
            extractable: jwk.ext.unwrap_or(false),
            usages: jwk.key_ops.unwrap_or_default(),
            material,
        })
    }
}

pub struct CryptoKeyHook {
    backend: Arc<dyn KeyBackend>,
}

impl CryptoKeyHook {
    pub fn new(backend: Arc<dyn KeyBackend>) -> Self {
        Self { backend }
    }
}

impl HostObjectHook for CryptoKeyHook {
    fn tag(&self) -> &'static str {
        CRYPTO_KEY_TAG
    }

    fn matches(&self, value: &Value) -> bool {
        value.as_host::<CryptoKey>().is_some()
    }

    fn write(&self, value: &Value, serializer: &mut Serializer<'_>) -> sibling_codec::Result<()> {
        let key = value
            .as_host::<CryptoKey>()
            .ok_or_else(|| CloneError::HostObjectWrite(value.describe()))?;
        let jwk = self
            .backend
            .export_jwk(key)
            .map_err(|e| CloneError::HostObjectWrite(e.to_string()))?;
        let jwk = serde_json::to_value(jwk)
            .map_err(|e| CloneError::HostObjectWrite(e.to_string()))?;

        serializer.write(&Value::string(key.algorithm.clone()))?;
        serializer.write(&Value::from(jwk))
    }

    fn read(&self, deserializer: &mut Deserializer<'_>) -> sibling_codec::Result<Value> {
        let algorithm = deserializer.read_string_value()?;
        let jwk = deserializer
            .read_value()?
            .to_json()
            .ok_or_else(|| CloneError::HostObjectRead("key material is not a JWK".to_string()))?;
        let jwk: JsonWebKey = serde_json::from_value(jwk)
            .map_err(|e| CloneError::HostObjectRead(e.to_string()))?;
        let key = self
            .backend
            .import_jwk(&algorithm, jwk)
            .map_err(|e| CloneError::HostObjectRead(e.to_string()))?;
        Ok(Value::host(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sibling_codec::{decode, encode};

    fn hooks() -> Vec<Arc<dyn HostObjectHook>> {
        vec![Arc::new(CryptoKeyHook::new(Arc::new(JwkKeyBackend)))]
    }

    fn aes_key(extractable: bool) -> CryptoKey {
        CryptoKey::new(
            "AES-GCM",
            extractable,
            vec!["encrypt".to_string(), "decrypt".to_string()],
            vec![0x11; 16],
        )
    }

    #[test]
    fn test_key_round_trip() {
        let hooks = hooks();
        let value = Value::host(aes_key(true));
        let encoded = encode(&value, &[], &hooks).unwrap();
        let decoded = decode(&encoded, &hooks).unwrap();

        let key = decoded.as_host::<CryptoKey>().unwrap();
        assert_eq!(key, &aes_key(true));
    }

    #[test]
    fn test_non_extractable_key_is_not_cloneable() {
        let err = encode(&Value::host(aes_key(false)), &[], &hooks()).unwrap_err();
        assert_eq!(
            err,
            CloneError::HostObjectWrite("key is not extractable".to_string())
        );
    }

    #[test]
    fn test_import_takes_extractable_from_jwk() {
        let jwk = JsonWebKey {
            kty: "oct".to_string(),
            k: Some(URL_SAFE_NO_PAD.encode([1u8, 2, 3, 4])),
            alg: None,
            ext: None,
            key_ops: None,
        };
        let key = JwkKeyBackend.import_jwk("HMAC", jwk).unwrap();
        assert!(!key.extractable);
        assert_eq!(key.material(), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_import_rejects_bad_jwk() {
        let bad_kty = JsonWebKey {
            kty: "RSA".to_string(),
            k: None,
            alg: None,
            ext: None,
            key_ops: None,
        };
        assert_eq!(
            JwkKeyBackend.import_jwk("AES-GCM", bad_kty),
            Err(KeyError::UnsupportedKeyType("RSA".to_string()))
        );

        let bad_material = JsonWebKey {
            kty: "oct".to_string(),
            k: Some("***".to_string()),
            alg: None,
            ext: Some(true),
            key_ops: None,
        };
        assert!(matches!(
            JwkKeyBackend.import_jwk("AES-GCM", bad_material),
            Err(KeyError::InvalidKeyMaterial(_))
        ));
    }

    #[test]
    fn test_debug_hides_material() {
        let rendered = format!("{:?}", aes_key(true));
        assert!(rendered.contains("AES-GCM"));
        assert!(!rendered.contains("17"));
    }
}
