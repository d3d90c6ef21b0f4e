//! ABI document model (JSON form) plus conversion from / to the binary `abi_def`.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use std::sync::OnceLock;

use crate::buffer::SerialReader;
use crate::error::AbiError;
use crate::types::TypeTable;

/// Version prefix every supported ABI carries.
pub const ABI_VERSION_PREFIX: &str = "eosio::abi/1.";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Abi {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub types: Vec<AbiTypeDef>,
    #[serde(default)]
    pub structs: Vec<AbiStruct>,
    #[serde(default)]
    pub actions: Vec<AbiAction>,
    #[serde(default)]
    pub tables: Vec<AbiTable>,
    #[serde(default)]
    pub ricardian_clauses: Vec<AbiClause>,
    #[serde(default)]
    pub error_messages: Vec<AbiErrorMessage>,
    #[serde(default)]
    pub abi_extensions: Vec<AbiExtension>,
    #[serde(default)]
    pub variants: Vec<AbiVariant>,
    #[serde(default)]
    pub action_results: Vec<AbiActionResult>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AbiTypeDef {
    pub new_type_name: String,
    #[serde(rename = "type")]
    pub type_: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AbiField {
    pub name: String,
    #[serde(rename = "type")]
    pub type_: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AbiStruct {
    pub name: String,
    #[serde(default)]
    pub base: String,
    #[serde(default)]
    pub fields: Vec<AbiField>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AbiAction {
    pub name: String,
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default)]
    pub ricardian_contract: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AbiTable {
    pub name: String,
    #[serde(default)]
    pub index_type: String,
    #[serde(default)]
    pub key_names: Vec<String>,
    #[serde(default)]
    pub key_types: Vec<String>,
    #[serde(rename = "type")]
    pub type_: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AbiClause {
    pub id: String,
    #[serde(default)]
    pub body: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AbiErrorMessage {
    #[serde(deserialize_with = "number_or_string")]
    pub error_code: u64,
    #[serde(default)]
    pub error_msg: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AbiExtension {
    pub tag: u16,
    /// Hex-encoded payload.
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AbiVariant {
    pub name: String,
    #[serde(default)]
    pub types: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AbiActionResult {
    pub name: String,
    pub result_type: String,
}

/// Wide integers arrive as decimal strings from the binary decoder and as
/// numbers from hand-written JSON.
fn number_or_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }
    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

impl Abi {
    pub fn from_json(json: &str) -> Result<Self, AbiError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Decode a binary `abi_def` blob (the payload of a `setabi` action).
    pub fn from_bin(data: &[u8]) -> Result<Self, AbiError> {
        let mut reader = SerialReader::new(data);
        let version = reader.read_string()?;
        if !version.starts_with(ABI_VERSION_PREFIX) {
            return Err(AbiError::UnsupportedAbiVersion(version));
        }
        // newer node versions append fields this layout does not know about
        let value = abi_def_table()?.decode_with("abi_def", data, false)?;
        Ok(serde_json::from_value(value)?)
    }

    /// Encode into the binary `abi_def` layout.
    pub fn to_bin(&self) -> Result<Vec<u8>, AbiError> {
        let value = serde_json::to_value(self)?;
        abi_def_table()?.encode("abi_def", &value)
    }

    /// Type name of `action`'s payload.
    pub fn action_type(&self, contract: &str, action: &str) -> Result<&str, AbiError> {
        self.actions
            .iter()
            .find(|a| a.name == action)
            .map(|a| a.type_.as_str())
            .ok_or_else(|| AbiError::TypeNotFound {
                kind: "action",
                contract: contract.to_string(),
                name: action.to_string(),
            })
    }

    /// Row type name of `table`.
    pub fn table_type(&self, contract: &str, table: &str) -> Result<&str, AbiError> {
        self.tables
            .iter()
            .find(|t| t.name == table)
            .map(|t| t.type_.as_str())
            .ok_or_else(|| AbiError::TypeNotFound {
                kind: "table",
                contract: contract.to_string(),
                name: table.to_string(),
            })
    }
}

// ─── Binary abi_def layout ──────────────────────────────────────────────────

fn abi_def_table() -> Result<&'static TypeTable, AbiError> {
    static TABLE: OnceLock<TypeTable> = OnceLock::new();
    if let Some(table) = TABLE.get() {
        return Ok(table);
    }
    let abi: Abi = serde_json::from_value(abi_def_layout())?;
    let table = TypeTable::new(&abi)?;
    Ok(TABLE.get_or_init(|| table))
}

fn abi_def_layout() -> Value {
    fn s(name: &str, fields: &[(&str, &str)]) -> Value {
        let fields: Vec<Value> = fields
            .iter()
            .map(|(n, t)| json!({ "name": n, "type": t }))
            .collect();
        json!({ "name": name, "base": "", "fields": fields })
    }

    json!({
        "version": "eosio::abi/1.1",
        "structs": [
            s("type_def", &[("new_type_name", "string"), ("type", "string")]),
            s("field_def", &[("name", "string"), ("type", "string")]),
            s("struct_def", &[("name", "string"), ("base", "string"), ("fields", "field_def[]")]),
            s("action_def", &[("name", "name"), ("type", "string"), ("ricardian_contract", "string")]),
            s("table_def", &[
                ("name", "name"),
                ("index_type", "string"),
                ("key_names", "string[]"),
                ("key_types", "string[]"),
                ("type", "string"),
            ]),
            s("clause_pair", &[("id", "string"), ("body", "string")]),
            s("error_message", &[("error_code", "uint64"), ("error_msg", "string")]),
            s("extensions_entry", &[("tag", "uint16"), ("value", "bytes")]),
            s("variant_def", &[("name", "string"), ("types", "string[]")]),
            s("action_result_def", &[("name", "name"), ("result_type", "string")]),
            s("abi_def", &[
                ("version", "string"),
                ("types", "type_def[]"),
                ("structs", "struct_def[]"),
                ("actions", "action_def[]"),
                ("tables", "table_def[]"),
                ("ricardian_clauses", "clause_pair[]"),
                ("error_messages", "error_message[]"),
                ("abi_extensions", "extensions_entry[]"),
                ("variants", "variant_def[]$"),
                ("action_results", "action_result_def[]$"),
            ]),
        ]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Abi {
        Abi::from_json(
            r#"{
                "version": "eosio::abi/1.2",
                "types": [{ "new_type_name": "account_name", "type": "name" }],
                "structs": [{
                    "name": "transfer",
                    "base": "",
                    "fields": [
                        { "name": "from", "type": "account_name" },
                        { "name": "to", "type": "account_name" },
                        { "name": "quantity", "type": "asset" },
                        { "name": "memo", "type": "string" }
                    ]
                }],
                "actions": [{ "name": "transfer", "type": "transfer", "ricardian_contract": "" }],
                "tables": [{ "name": "accounts", "index_type": "i64", "key_names": [], "key_types": [], "type": "account" }],
                "error_messages": [{ "error_code": 7, "error_msg": "boom" }],
                "variants": [{ "name": "v", "types": ["uint8", "string"] }]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn binary_abi_matches_json_form() {
        let abi = sample();
        let bin = abi.to_bin().unwrap();
        let decoded = Abi::from_bin(&bin).unwrap();
        assert_eq!(decoded, abi);
        assert_eq!(decoded.error_messages[0].error_code, 7);
    }

    #[test]
    fn binary_abi_without_trailing_extensions() {
        // a 1.0 ABI stops before `variants`
        let mut abi = sample();
        abi.version = "eosio::abi/1.0".into();
        let mut value = serde_json::to_value(&abi).unwrap();
        let object = value.as_object_mut().unwrap();
        object.remove("variants");
        object.remove("action_results");
        let bin = abi_def_table().unwrap().encode("abi_def", &value).unwrap();

        let decoded = Abi::from_bin(&bin).unwrap();
        assert!(decoded.variants.is_empty());
        assert!(decoded.action_results.is_empty());
        assert_eq!(decoded.structs, abi.structs);
    }

    #[test]
    fn unsupported_version_rejected() {
        let mut abi = sample();
        abi.version = "eosio::abi/2.0".into();
        let bin = abi.to_bin().unwrap();
        assert!(matches!(Abi::from_bin(&bin), Err(AbiError::UnsupportedAbiVersion(v)) if v == "eosio::abi/2.0"));
    }

    #[test]
    fn action_and_table_lookup() {
        let abi = sample();
        assert_eq!(abi.action_type("eosio.token", "transfer").unwrap(), "transfer");
        assert_eq!(abi.table_type("eosio.token", "accounts").unwrap(), "account");

        let err = abi.action_type("eosio.token", "issue").unwrap_err();
        assert_eq!(err.to_string(), "type for action not found eosio.token:issue");
        assert!(matches!(
            abi.table_type("eosio.token", "stat"),
            Err(AbiError::TypeNotFound { kind: "table", .. })
        ));
    }
}
