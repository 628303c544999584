//! ============================================================================
//! IDL Codec — Instruction encoding and account decoding
//! ============================================================================
//! Schema-directed binary codec driven by a program's IDL: 8-byte method and
//! account discriminators, little-endian packed arguments, and field walks
//! over typed account blobs.
//! ============================================================================

use sha2::{Digest, Sha256};
use solana_sdk::instruction::AccountMeta;
use solana_sdk::pubkey::Pubkey;
use std::collections::HashMap;

use super::types::{IdlAccount, IdlInstruction, IdlType};
use crate::error::{NodeError, Result};

/// First 8 bytes of `SHA-256("global:" ‖ name)`. Exactly 8, never 16.
pub fn method_discriminator(name: &str) -> [u8; 8] {
    prefixed_discriminator("global", name)
}

/// First 8 bytes of `SHA-256("account:" ‖ name)`.
pub fn account_discriminator(name: &str) -> [u8; 8] {
    prefixed_discriminator("account", name)
}

fn prefixed_discriminator(namespace: &str, name: &str) -> [u8; 8] {
    let hash = Sha256::digest(format!("{namespace}:{name}").as_bytes());
    let mut disc = [0u8; 8];
    disc.copy_from_slice(&hash[..8]);
    disc
}

/// A decoded field value. Heterogeneous by design: the IDL tells higher
/// layers which shape to expect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    U8(u8),
    U32(u32),
    U64(u64),
    I64(i64),
    Pubkey(Pubkey),
    Array(Vec<Value>),
    Vec(Vec<Value>),
}

impl Value {
    pub fn as_u8(&self) -> Option<u8> {
        match self {
            Value::U8(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::U64(v) => Some(*v),
            Value::U32(v) => Some(*v as u64),
            Value::U8(v) => Some(*v as u64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_pubkey(&self) -> Option<Pubkey> {
        match self {
            Value::Pubkey(v) => Some(*v),
            _ => None,
        }
    }

    pub fn items(&self) -> Option<&[Value]> {
        match self {
            Value::Array(v) | Value::Vec(v) => Some(v),
            _ => None,
        }
    }

    /// Collapse a `[u8; N]`-shaped value into raw bytes.
    pub fn as_bytes(&self) -> Option<Vec<u8>> {
        self.items()?
            .iter()
            .map(Value::as_u8)
            .collect::<Option<Vec<u8>>>()
    }
}

/// Packed size of a type, or `None` when it contains a `vec` (size only
/// known at decode time).
pub fn fixed_size(ty: &IdlType) -> Option<usize> {
    match ty {
        IdlType::U8 => Some(1),
        IdlType::U32 => Some(4),
        IdlType::U64 | IdlType::I64 => Some(8),
        // Always 32 on the wire.
        IdlType::PublicKey => Some(32),
        IdlType::Array(inner, len) => fixed_size(inner).map(|s| s * len),
        IdlType::Vec(_) => None,
    }
}

fn mismatch(ty: &IdlType, value: &Value) -> NodeError {
    NodeError::InvalidAccountData(format!("expected {ty:?}, got {value:?}"))
}

/// Append the little-endian packing of `value` as `ty` to `out`.
pub fn encode_value(ty: &IdlType, value: &Value, out: &mut Vec<u8>) -> Result<()> {
    match (ty, value) {
        (IdlType::U8, Value::U8(v)) => out.push(*v),
        (IdlType::U32, Value::U32(v)) => out.extend_from_slice(&v.to_le_bytes()),
        (IdlType::U64, Value::U64(v)) => out.extend_from_slice(&v.to_le_bytes()),
        (IdlType::I64, Value::I64(v)) => out.extend_from_slice(&v.to_le_bytes()),
        (IdlType::PublicKey, Value::Pubkey(v)) => out.extend_from_slice(v.as_ref()),
        (IdlType::Array(inner, len), Value::Array(items)) => {
            if items.len() != *len {
                return Err(NodeError::InvalidAccountData(format!(
                    "array length {} does not match declared {len}",
                    items.len()
                )));
            }
            for item in items {
                encode_value(inner, item, out)?;
            }
        }
        (IdlType::Vec(inner), Value::Vec(items)) => {
            out.extend_from_slice(&(items.len() as u32).to_le_bytes());
            for item in items {
                encode_value(inner, item, out)?;
            }
        }
        (ty, value) => return Err(mismatch(ty, value)),
    }
    Ok(())
}

fn take<'a>(data: &'a [u8], offset: &mut usize, n: usize) -> Result<&'a [u8]> {
    let end = offset
        .checked_add(n)
        .filter(|&end| end <= data.len())
        .ok_or_else(|| {
            NodeError::InvalidAccountData(format!(
                "truncated data: need {n} bytes at offset {offset}, have {}",
                data.len()
            ))
        })?;
    let slice = &data[*offset..end];
    *offset = end;
    Ok(slice)
}

/// Read one `ty`-shaped value from `data` starting at `*offset`, advancing
/// the offset past it. Integers are little-endian; `vec` reads a 4-byte LE
/// count first.
pub fn decode_value(ty: &IdlType, data: &[u8], offset: &mut usize) -> Result<Value> {
    match ty {
        IdlType::U8 => Ok(Value::U8(take(data, offset, 1)?[0])),
        IdlType::U32 => Ok(Value::U32(u32::from_le_bytes(
            take(data, offset, 4)?.try_into().unwrap(),
        ))),
        IdlType::U64 => Ok(Value::U64(u64::from_le_bytes(
            take(data, offset, 8)?.try_into().unwrap(),
        ))),
        IdlType::I64 => Ok(Value::I64(i64::from_le_bytes(
            take(data, offset, 8)?.try_into().unwrap(),
        ))),
        IdlType::PublicKey => {
            let bytes: [u8; 32] = take(data, offset, 32)?.try_into().unwrap();
            Ok(Value::Pubkey(Pubkey::from(bytes)))
        }
        IdlType::Array(inner, len) => {
            let mut items = Vec::with_capacity(*len);
            for _ in 0..*len {
                items.push(decode_value(inner, data, offset)?);
            }
            Ok(Value::Array(items))
        }
        IdlType::Vec(inner) => {
            let count = u32::from_le_bytes(take(data, offset, 4)?.try_into().unwrap()) as usize;
            let mut items = Vec::with_capacity(count.min(1024));
            for _ in 0..count {
                items.push(decode_value(inner, data, offset)?);
            }
            Ok(Value::Vec(items))
        }
    }
}

/// `discriminator(8) ‖ packed args`, in declared order.
pub fn encode_instruction_data(ix: &IdlInstruction, args: &[Value]) -> Result<Vec<u8>> {
    if args.len() != ix.args.len() {
        return Err(NodeError::InvalidAccountData(format!(
            "instruction `{}` takes {} args, got {}",
            ix.name,
            ix.args.len(),
            args.len()
        )));
    }

    let mut data = Vec::with_capacity(8 + 64);
    data.extend_from_slice(&method_discriminator(&ix.name));
    for (spec, value) in ix.args.iter().zip(args) {
        encode_value(&spec.ty, value, &mut data)?;
    }
    Ok(data)
}

/// Resolve the ordered account-meta list from a name→pubkey table.
/// Fails with `MissingAccount` before any network traffic.
pub fn resolve_accounts(
    ix: &IdlInstruction,
    table: &HashMap<String, Pubkey>,
) -> Result<Vec<AccountMeta>> {
    ix.accounts
        .iter()
        .map(|spec| {
            let pubkey = table
                .get(&spec.name)
                .copied()
                .ok_or_else(|| NodeError::MissingAccount(spec.name.clone()))?;
            Ok(if spec.is_mut {
                AccountMeta::new(pubkey, spec.is_signer)
            } else {
                AccountMeta::new_readonly(pubkey, spec.is_signer)
            })
        })
        .collect()
}

/// Decode an account blob: verify the discriminator, then walk the fields.
pub fn decode_account(def: &IdlAccount, data: &[u8]) -> Result<HashMap<String, Value>> {
    if data.len() < 8 {
        return Err(NodeError::InvalidAccountData(format!(
            "{}: {} bytes is shorter than a discriminator",
            def.name,
            data.len()
        )));
    }
    if data[..8] != account_discriminator(&def.name) {
        return Err(NodeError::InvalidAccountData(format!(
            "{}: discriminator mismatch",
            def.name
        )));
    }

    let mut offset = 8;
    let mut fields = HashMap::with_capacity(def.ty.fields.len());
    for field in &def.ty.fields {
        let value = decode_value(&field.ty, data, &mut offset)?;
        fields.insert(field.name.clone(), value);
    }
    Ok(fields)
}

/// Re-encode a decoded account (discriminator plus packed fields in declared
/// order). Inverse of [`decode_account`].
pub fn encode_account(def: &IdlAccount, fields: &HashMap<String, Value>) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    data.extend_from_slice(&account_discriminator(&def.name));
    for field in &def.ty.fields {
        let value = fields.get(&field.name).ok_or_else(|| {
            NodeError::InvalidAccountData(format!("{}: missing field `{}`", def.name, field.name))
        })?;
        encode_value(&field.ty, value, &mut data)?;
    }
    Ok(data)
}

/// Translate operator filters `{field -> value}` into RPC memcmp filters:
/// one on the account discriminator, one per field at its IDL-computed byte
/// offset. Fails before any I/O when a field is unknown or unreachable.
pub fn account_filters(
    def: &IdlAccount,
    fields: &[(&str, &Value)],
) -> Result<Vec<crate::rpc::MemcmpFilter>> {
    let mut filters = vec![crate::rpc::MemcmpFilter::new(
        0,
        &account_discriminator(&def.name),
    )];

    for (name, value) in fields {
        let offset = field_offset(def, name)?;
        let ty = def
            .ty
            .fields
            .iter()
            .find(|f| f.name == *name)
            .map(|f| &f.ty)
            .ok_or_else(|| {
                NodeError::InvalidAccountData(format!("{}: no field `{name}`", def.name))
            })?;
        let mut raw = Vec::new();
        encode_value(ty, value, &mut raw)?;
        filters.push(crate::rpc::MemcmpFilter::new(offset, &raw));
    }
    Ok(filters)
}

/// Byte offset of `field` within an account blob (after the discriminator).
/// Fails when the field is unknown or sits behind a dynamically-sized one.
pub fn field_offset(def: &IdlAccount, field: &str) -> Result<usize> {
    let mut offset = 8;
    for f in &def.ty.fields {
        if f.name == field {
            return Ok(offset);
        }
        offset += fixed_size(&f.ty).ok_or_else(|| {
            NodeError::InvalidAccountData(format!(
                "{}: field `{field}` sits behind dynamically sized `{}`",
                def.name, f.name
            ))
        })?;
    }
    Err(NodeError::InvalidAccountData(format!(
        "{}: no field `{field}`",
        def.name
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idl::types::{IdlField, IdlInstructionAccount, IdlTypeDef};

    fn run_account_def() -> IdlAccount {
        IdlAccount {
            name: "RunAccount".into(),
            ty: IdlTypeDef {
                kind: "struct".into(),
                fields: vec![
                    IdlField {
                        name: "a".into(),
                        ty: IdlType::U64,
                    },
                    IdlField {
                        name: "b".into(),
                        ty: IdlType::PublicKey,
                    },
                    IdlField {
                        name: "c".into(),
                        ty: IdlType::Vec(Box::new(IdlType::PublicKey)),
                    },
                ],
            },
        }
    }

    #[test]
    fn method_discriminator_is_sha256_prefix() {
        let disc = method_discriminator("work");
        let hash = Sha256::digest(b"global:work");
        assert_eq!(disc.len(), 8);
        assert_eq!(&disc, &hash[..8]);
    }

    #[test]
    fn sizes_are_fixed_except_vec() {
        assert_eq!(fixed_size(&IdlType::U8), Some(1));
        assert_eq!(fixed_size(&IdlType::U32), Some(4));
        assert_eq!(fixed_size(&IdlType::U64), Some(8));
        assert_eq!(fixed_size(&IdlType::I64), Some(8));
        assert_eq!(fixed_size(&IdlType::PublicKey), Some(32));
        assert_eq!(
            fixed_size(&IdlType::Array(Box::new(IdlType::PublicKey), 3)),
            Some(96)
        );
        assert_eq!(fixed_size(&IdlType::Vec(Box::new(IdlType::U8))), None);
    }

    #[test]
    fn encoded_payload_length_matches_arg_sizes() {
        let ix = IdlInstruction {
            name: "list".into(),
            accounts: vec![],
            args: vec![
                IdlField {
                    name: "ipfsJob".into(),
                    ty: IdlType::Array(Box::new(IdlType::U8), 32),
                },
                IdlField {
                    name: "timeout".into(),
                    ty: IdlType::I64,
                },
            ],
        };
        let args = [
            Value::Array((0..32).map(Value::U8).collect()),
            Value::I64(-1),
        ];
        let data = encode_instruction_data(&ix, &args).unwrap();
        assert_eq!(data.len(), 8 + 32 + 8);
        assert_eq!(&data[..8], &method_discriminator("list"));
    }

    #[test]
    fn vec_encoding_carries_le_count_prefix() {
        let ty = IdlType::Vec(Box::new(IdlType::U64));
        let mut out = Vec::new();
        encode_value(&ty, &Value::Vec(vec![Value::U64(7), Value::U64(9)]), &mut out).unwrap();
        assert_eq!(&out[..4], &2u32.to_le_bytes());
        assert_eq!(out.len(), 4 + 16);
    }

    #[test]
    fn account_roundtrip() {
        let def = run_account_def();
        let mut fields = HashMap::new();
        fields.insert("a".to_string(), Value::U64(42));
        fields.insert("b".to_string(), Value::Pubkey(Pubkey::from([0x01; 32])));
        fields.insert(
            "c".to_string(),
            Value::Vec(vec![
                Value::Pubkey(Pubkey::from([0x02; 32])),
                Value::Pubkey(Pubkey::from([0x03; 32])),
            ]),
        );

        let blob = encode_account(&def, &fields).unwrap();
        let decoded = decode_account(&def, &blob).unwrap();
        assert_eq!(decoded, fields);

        let reencoded = encode_account(&def, &decoded).unwrap();
        assert_eq!(reencoded, blob);
    }

    #[test]
    fn decode_rejects_wrong_discriminator() {
        let def = run_account_def();
        let blob = vec![0u8; 64];
        assert!(matches!(
            decode_account(&def, &blob),
            Err(NodeError::InvalidAccountData(_))
        ));
    }

    #[test]
    fn decode_rejects_truncated_data() {
        let def = run_account_def();
        let mut blob = account_discriminator("RunAccount").to_vec();
        blob.extend_from_slice(&42u64.to_le_bytes());
        // pubkey and vec missing
        assert!(decode_account(&def, &blob).is_err());
    }

    #[test]
    fn missing_account_fails_without_io() {
        let ix = IdlInstruction {
            name: "finish".into(),
            accounts: vec![IdlInstructionAccount {
                name: "job".into(),
                is_mut: true,
                is_signer: false,
            }],
            args: vec![],
        };
        let err = resolve_accounts(&ix, &HashMap::new()).unwrap_err();
        match err {
            NodeError::MissingAccount(name) => assert_eq!(name, "job"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn account_metas_keep_declared_order_and_flags() {
        let ix = IdlInstruction {
            name: "finish".into(),
            accounts: vec![
                IdlInstructionAccount {
                    name: "job".into(),
                    is_mut: true,
                    is_signer: false,
                },
                IdlInstructionAccount {
                    name: "authority".into(),
                    is_mut: false,
                    is_signer: true,
                },
            ],
            args: vec![],
        };
        let mut table = HashMap::new();
        let job = Pubkey::new_unique();
        let authority = Pubkey::new_unique();
        table.insert("job".to_string(), job);
        table.insert("authority".to_string(), authority);

        let metas = resolve_accounts(&ix, &table).unwrap();
        assert_eq!(metas[0].pubkey, job);
        assert!(metas[0].is_writable);
        assert!(!metas[0].is_signer);
        assert_eq!(metas[1].pubkey, authority);
        assert!(!metas[1].is_writable);
        assert!(metas[1].is_signer);
    }

    #[test]
    fn field_offsets_follow_declared_layout() {
        let def = run_account_def();
        assert_eq!(field_offset(&def, "a").unwrap(), 8);
        assert_eq!(field_offset(&def, "b").unwrap(), 16);
        assert_eq!(field_offset(&def, "c").unwrap(), 48);
        assert!(field_offset(&def, "nope").is_err());
    }

    #[test]
    fn field_behind_vec_has_no_offset() {
        let def = IdlAccount {
            name: "MarketAccount".into(),
            ty: IdlTypeDef {
                kind: "struct".into(),
                fields: vec![
                    IdlField {
                        name: "queue".into(),
                        ty: IdlType::Vec(Box::new(IdlType::PublicKey)),
                    },
                    IdlField {
                        name: "authority".into(),
                        ty: IdlType::PublicKey,
                    },
                ],
            },
        };
        assert!(field_offset(&def, "authority").is_err());
    }
}
