//! ============================================================================
//! IDL Model — Anchor interface descriptors
//! ============================================================================
//! Serde model for the JSON stored (zlib-compressed) in a program's IDL
//! account. Only the subset the worker consumes is modeled: instructions,
//! account types, and the primitive/compound type tags.
//! ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::{json, Value as Json};

/// A declared field type. Primitives are JSON strings (`"u64"`), compounds
/// are single-key objects (`{"array": [inner, len]}`, `{"vec": inner}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Json", into = "Json")]
pub enum IdlType {
    U8,
    U32,
    U64,
    I64,
    PublicKey,
    Array(Box<IdlType>, usize),
    Vec(Box<IdlType>),
}

impl TryFrom<Json> for IdlType {
    type Error = String;

    fn try_from(value: Json) -> Result<Self, Self::Error> {
        match value {
            Json::String(s) => match s.as_str() {
                "u8" => Ok(IdlType::U8),
                "u32" => Ok(IdlType::U32),
                "u64" => Ok(IdlType::U64),
                "i64" => Ok(IdlType::I64),
                "publicKey" => Ok(IdlType::PublicKey),
                other => Err(format!("unsupported IDL type: {other}")),
            },
            Json::Object(map) => {
                if let Some(arr) = map.get("array") {
                    let parts = arr
                        .as_array()
                        .filter(|a| a.len() == 2)
                        .ok_or_else(|| "array type needs [inner, len]".to_string())?;
                    let inner = IdlType::try_from(parts[0].clone())?;
                    let len = parts[1]
                        .as_u64()
                        .ok_or_else(|| "array length must be a number".to_string())?;
                    Ok(IdlType::Array(Box::new(inner), len as usize))
                } else if let Some(inner) = map.get("vec") {
                    Ok(IdlType::Vec(Box::new(IdlType::try_from(inner.clone())?)))
                } else {
                    Err(format!(
                        "unsupported IDL type object: {}",
                        Json::Object(map)
                    ))
                }
            }
            other => Err(format!("unsupported IDL type: {other}")),
        }
    }
}

impl From<IdlType> for Json {
    fn from(ty: IdlType) -> Json {
        match ty {
            IdlType::U8 => json!("u8"),
            IdlType::U32 => json!("u32"),
            IdlType::U64 => json!("u64"),
            IdlType::I64 => json!("i64"),
            IdlType::PublicKey => json!("publicKey"),
            IdlType::Array(inner, len) => json!({"array": [Json::from(*inner), len]}),
            IdlType::Vec(inner) => json!({"vec": Json::from(*inner)}),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdlField {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: IdlType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdlInstructionAccount {
    pub name: String,
    #[serde(default)]
    pub is_mut: bool,
    #[serde(default)]
    pub is_signer: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdlInstruction {
    pub name: String,
    #[serde(default)]
    pub accounts: Vec<IdlInstructionAccount>,
    #[serde(default)]
    pub args: Vec<IdlField>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdlTypeDef {
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub fields: Vec<IdlField>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdlAccount {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: IdlTypeDef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Idl {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    pub instructions: Vec<IdlInstruction>,
    #[serde(default)]
    pub accounts: Vec<IdlAccount>,
}

impl Idl {
    pub fn instruction(&self, name: &str) -> Option<&IdlInstruction> {
        self.instructions.iter().find(|i| i.name == name)
    }

    pub fn account(&self, name: &str) -> Option<&IdlAccount> {
        self.accounts.iter().find(|a| a.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitive_types_parse() {
        for (raw, expect) in [
            ("\"u8\"", IdlType::U8),
            ("\"u32\"", IdlType::U32),
            ("\"u64\"", IdlType::U64),
            ("\"i64\"", IdlType::I64),
            ("\"publicKey\"", IdlType::PublicKey),
        ] {
            let ty: IdlType = serde_json::from_str(raw).unwrap();
            assert_eq!(ty, expect);
        }
    }

    #[test]
    fn compound_types_parse() {
        let arr: IdlType = serde_json::from_str(r#"{"array": ["u8", 32]}"#).unwrap();
        assert_eq!(arr, IdlType::Array(Box::new(IdlType::U8), 32));

        let vec: IdlType = serde_json::from_str(r#"{"vec": "publicKey"}"#).unwrap();
        assert_eq!(vec, IdlType::Vec(Box::new(IdlType::PublicKey)));
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!(serde_json::from_str::<IdlType>("\"u128\"").is_err());
        assert!(serde_json::from_str::<IdlType>(r#"{"option": "u8"}"#).is_err());
    }

    #[test]
    fn type_json_roundtrip() {
        let ty = IdlType::Vec(Box::new(IdlType::Array(Box::new(IdlType::U64), 4)));
        let json = serde_json::to_string(&ty).unwrap();
        let back: IdlType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ty);
    }

    #[test]
    fn idl_document_parses() {
        let idl: Idl = serde_json::from_str(
            r#"{
                "version": "0.1.0",
                "name": "jobs",
                "instructions": [
                    {
                        "name": "finish",
                        "accounts": [
                            {"name": "job", "isMut": true, "isSigner": false},
                            {"name": "run", "isMut": true, "isSigner": false},
                            {"name": "payer", "isMut": true, "isSigner": false}
                        ],
                        "args": [{"name": "ipfsResult", "type": {"array": ["u8", 32]}}]
                    }
                ],
                "accounts": [
                    {
                        "name": "RunAccount",
                        "type": {
                            "kind": "struct",
                            "fields": [
                                {"name": "job", "type": "publicKey"},
                                {"name": "node", "type": "publicKey"},
                                {"name": "payer", "type": "publicKey"},
                                {"name": "time", "type": "i64"}
                            ]
                        }
                    }
                ]
            }"#,
        )
        .unwrap();

        let finish = idl.instruction("finish").unwrap();
        assert_eq!(finish.accounts.len(), 3);
        assert!(finish.accounts[0].is_mut);
        assert!(!finish.accounts[0].is_signer);
        assert_eq!(
            finish.args[0].ty,
            IdlType::Array(Box::new(IdlType::U8), 32)
        );
        assert!(idl.account("RunAccount").is_some());
        assert!(idl.account("Nope").is_none());
    }
}
