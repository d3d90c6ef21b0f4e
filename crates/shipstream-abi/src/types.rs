//! Compiled type table: resolves every type an ABI names once, then walks the
//! resolved graph to decode or encode values.
//!
//! Type names may carry the suffixes `[]` (array), `?` (optional) and `$`
//! (binary extension). A struct field of extension type is omitted when the
//! input ends before it, and serialization stops at the first extension
//! field the value does not carry.

use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

use crate::abi::Abi;
use crate::buffer::{SerialReader, SerialWriter};
use crate::builtin::Builtin;
use crate::error::AbiError;

/// Maximum nesting of structs / containers while walking a value.
const MAX_DEPTH: usize = 256;

#[derive(Debug, Clone)]
enum Node {
    Builtin(Builtin),
    Array(usize),
    Optional(usize),
    Extension(usize),
    Struct {
        base: Option<usize>,
        fields: Vec<(String, usize)>,
    },
    Variant {
        cases: Vec<(String, usize)>,
    },
}

#[derive(Debug, Clone, Default)]
pub struct TypeTable {
    nodes: Vec<Node>,
    labels: Vec<String>,
    index: HashMap<String, usize>,
}

// ─── Compilation ────────────────────────────────────────────────────────────

struct Compiler<'a> {
    abi: &'a Abi,
    table: TypeTable,
    aliases: HashMap<&'a str, &'a str>,
    resolving_aliases: HashSet<String>,
}

impl<'a> Compiler<'a> {
    fn push(&mut self, label: &str, node: Node) -> usize {
        let idx = self.table.nodes.len();
        self.table.nodes.push(node);
        self.table.labels.push(label.to_string());
        self.table.index.insert(label.to_string(), idx);
        idx
    }

    fn resolve(&mut self, name: &str) -> Result<usize, AbiError> {
        if let Some(&idx) = self.table.index.get(name) {
            return Ok(idx);
        }

        if let Some(inner) = name.strip_suffix('$') {
            let inner = self.resolve(inner)?;
            return Ok(self.push(name, Node::Extension(inner)));
        }
        if let Some(inner) = name.strip_suffix('?') {
            let inner = self.resolve(inner)?;
            return Ok(self.push(name, Node::Optional(inner)));
        }
        if let Some(inner) = name.strip_suffix("[]") {
            let inner = self.resolve(inner)?;
            return Ok(self.push(name, Node::Array(inner)));
        }

        if let Some(&target) = self.aliases.get(name) {
            if !self.resolving_aliases.insert(name.to_string()) {
                return Err(AbiError::invalid(name, "type alias cycle"));
            }
            let idx = self.resolve(target)?;
            self.resolving_aliases.remove(name);
            self.table.index.insert(name.to_string(), idx);
            return Ok(idx);
        }

        let abi = self.abi;
        if let Some(def) = abi.structs.iter().find(|s| s.name == name) {
            // placeholder first so self-referencing structs resolve
            let idx = self.push(name, Node::Struct { base: None, fields: Vec::new() });
            let base = if def.base.is_empty() {
                None
            } else {
                Some(self.resolve(&def.base)?)
            };
            let mut fields = Vec::with_capacity(def.fields.len());
            for field in &def.fields {
                fields.push((field.name.clone(), self.resolve(&field.type_)?));
            }
            self.table.nodes[idx] = Node::Struct { base, fields };
            return Ok(idx);
        }

        if let Some(def) = abi.variants.iter().find(|v| v.name == name) {
            let idx = self.push(name, Node::Variant { cases: Vec::new() });
            let mut cases = Vec::with_capacity(def.types.len());
            for ty in &def.types {
                cases.push((ty.clone(), self.resolve(ty)?));
            }
            self.table.nodes[idx] = Node::Variant { cases };
            return Ok(idx);
        }

        Err(AbiError::UnknownType(name.to_string()))
    }
}

impl TypeTable {
    /// Compile every alias, struct and variant declared by `abi`.
    pub fn new(abi: &Abi) -> Result<Self, AbiError> {
        let mut compiler = Compiler {
            abi,
            table: TypeTable::default(),
            aliases: abi
                .types
                .iter()
                .map(|t| (t.new_type_name.as_str(), t.type_.as_str()))
                .collect(),
            resolving_aliases: HashSet::new(),
        };
        for (name, builtin) in Builtin::all() {
            compiler.push(name, Node::Builtin(builtin));
        }
        for alias in &abi.types {
            compiler.resolve(&alias.new_type_name)?;
        }
        for def in &abi.structs {
            compiler.resolve(&def.name)?;
        }
        for def in &abi.variants {
            compiler.resolve(&def.name)?;
        }
        Ok(compiler.table)
    }

    /// Whether `name` (including any container suffixes) can be processed.
    pub fn has_type(&self, name: &str) -> bool {
        self.index.contains_key(name)
            || strip_container(name).is_some_and(|(_, inner)| self.has_type(inner))
    }

    /// Decode `data` as `type_name`, rejecting unread trailing bytes.
    pub fn decode(&self, type_name: &str, data: &[u8]) -> Result<Value, AbiError> {
        self.decode_with(type_name, data, true)
    }

    pub fn decode_with(&self, type_name: &str, data: &[u8], check_length: bool) -> Result<Value, AbiError> {
        let mut reader = SerialReader::new(data);
        let value = self.decode_from(type_name, &mut reader)?;
        if check_length && !reader.is_empty() {
            return Err(AbiError::TrailingBytes {
                type_name: type_name.to_string(),
                remaining: reader.remaining(),
            });
        }
        Ok(value)
    }

    /// Decode one value of `type_name` from the reader's current position.
    pub fn decode_from(&self, type_name: &str, r: &mut SerialReader<'_>) -> Result<Value, AbiError> {
        self.decode_named(type_name, r, 0)
    }

    pub fn encode(&self, type_name: &str, value: &Value) -> Result<Vec<u8>, AbiError> {
        let mut w = SerialWriter::new();
        self.encode_named(type_name, value, &mut w, 0)?;
        Ok(w.into_bytes())
    }

    // ─── Decode ─────────────────────────────────────────────────────────────

    fn decode_named(&self, name: &str, r: &mut SerialReader<'_>, depth: usize) -> Result<Value, AbiError> {
        if let Some(&idx) = self.index.get(name) {
            return self.decode_node(idx, r, depth);
        }
        if depth > MAX_DEPTH {
            return Err(AbiError::RecursionLimit(name.to_string()));
        }
        match strip_container(name) {
            Some((Container::Extension, inner)) => {
                if r.is_empty() {
                    Ok(Value::Null)
                } else {
                    self.decode_named(inner, r, depth + 1)
                }
            }
            Some((Container::Optional, inner)) => match read_flag(name, r)? {
                false => Ok(Value::Null),
                true => self.decode_named(inner, r, depth + 1),
            },
            Some((Container::Array, inner)) => {
                let len = r.read_varuint32()? as usize;
                let mut items = Vec::with_capacity(len.min(r.remaining()));
                for _ in 0..len {
                    items.push(self.decode_named(inner, r, depth + 1)?);
                }
                Ok(Value::Array(items))
            }
            None => Err(AbiError::UnknownType(name.to_string())),
        }
    }

    fn decode_node(&self, idx: usize, r: &mut SerialReader<'_>, depth: usize) -> Result<Value, AbiError> {
        if depth > MAX_DEPTH {
            return Err(AbiError::RecursionLimit(self.labels[idx].clone()));
        }
        match &self.nodes[idx] {
            Node::Builtin(b) => b.decode(r),
            Node::Array(inner) => {
                let len = r.read_varuint32()? as usize;
                let mut items = Vec::with_capacity(len.min(r.remaining()));
                for _ in 0..len {
                    items.push(self.decode_node(*inner, r, depth + 1)?);
                }
                Ok(Value::Array(items))
            }
            Node::Optional(inner) => match read_flag(&self.labels[idx], r)? {
                false => Ok(Value::Null),
                true => self.decode_node(*inner, r, depth + 1),
            },
            Node::Extension(inner) => {
                if r.is_empty() {
                    Ok(Value::Null)
                } else {
                    self.decode_node(*inner, r, depth + 1)
                }
            }
            Node::Struct { .. } => {
                let mut object = Map::new();
                self.decode_struct_into(idx, r, depth, &mut object)?;
                Ok(Value::Object(object))
            }
            Node::Variant { cases } => {
                let case = r.read_varuint32()? as usize;
                let (case_name, case_idx) = cases.get(case).ok_or_else(|| {
                    AbiError::invalid(&self.labels[idx], format!("variant index {case} out of range"))
                })?;
                let value = self.decode_node(*case_idx, r, depth + 1)?;
                Ok(Value::Array(vec![Value::String(case_name.clone()), value]))
            }
        }
    }

    fn decode_struct_into(
        &self,
        idx: usize,
        r: &mut SerialReader<'_>,
        depth: usize,
        object: &mut Map<String, Value>,
    ) -> Result<(), AbiError> {
        if depth > MAX_DEPTH {
            return Err(AbiError::RecursionLimit(self.labels[idx].clone()));
        }
        let Node::Struct { base, fields } = &self.nodes[idx] else {
            return Err(AbiError::invalid(&self.labels[idx], "base type is not a struct"));
        };
        if let Some(base) = base {
            self.decode_struct_into(*base, r, depth + 1, object)?;
        }
        for (field, field_idx) in fields {
            if r.is_empty() && matches!(self.nodes[*field_idx], Node::Extension(_)) {
                break;
            }
            let value = self.decode_node(*field_idx, r, depth + 1)?;
            object.insert(field.clone(), value);
        }
        Ok(())
    }

    // ─── Encode ─────────────────────────────────────────────────────────────

    fn encode_named(&self, name: &str, value: &Value, w: &mut SerialWriter, depth: usize) -> Result<(), AbiError> {
        if let Some(&idx) = self.index.get(name) {
            return self.encode_node(idx, value, w, depth);
        }
        if depth > MAX_DEPTH {
            return Err(AbiError::RecursionLimit(name.to_string()));
        }
        match strip_container(name) {
            Some((Container::Extension, inner)) => self.encode_named(inner, value, w, depth + 1),
            Some((Container::Optional, inner)) => {
                if value.is_null() {
                    w.write_u8(0);
                    Ok(())
                } else {
                    w.write_u8(1);
                    self.encode_named(inner, value, w, depth + 1)
                }
            }
            Some((Container::Array, inner)) => {
                let items = value
                    .as_array()
                    .ok_or_else(|| AbiError::invalid(name, format!("expected array, got {value}")))?;
                w.write_varuint32(items.len() as u32);
                for item in items {
                    self.encode_named(inner, item, w, depth + 1)?;
                }
                Ok(())
            }
            None => Err(AbiError::UnknownType(name.to_string())),
        }
    }

    fn encode_node(&self, idx: usize, value: &Value, w: &mut SerialWriter, depth: usize) -> Result<(), AbiError> {
        if depth > MAX_DEPTH {
            return Err(AbiError::RecursionLimit(self.labels[idx].clone()));
        }
        let label = &self.labels[idx];
        match &self.nodes[idx] {
            Node::Builtin(b) => b.encode(value, w),
            Node::Array(inner) => {
                let items = value
                    .as_array()
                    .ok_or_else(|| AbiError::invalid(label, format!("expected array, got {value}")))?;
                w.write_varuint32(items.len() as u32);
                for item in items {
                    self.encode_node(*inner, item, w, depth + 1)?;
                }
                Ok(())
            }
            Node::Optional(inner) => {
                if value.is_null() {
                    w.write_u8(0);
                    Ok(())
                } else {
                    w.write_u8(1);
                    self.encode_node(*inner, value, w, depth + 1)
                }
            }
            Node::Extension(inner) => self.encode_node(*inner, value, w, depth + 1),
            Node::Struct { .. } => {
                let object = value
                    .as_object()
                    .ok_or_else(|| AbiError::invalid(label, format!("expected object, got {value}")))?;
                self.encode_struct(idx, object, w, depth)?;
                Ok(())
            }
            Node::Variant { cases } => {
                let (case_name, case_value) = match value.as_array().map(Vec::as_slice) {
                    Some([Value::String(n), v]) => (n.as_str(), v),
                    _ => return Err(AbiError::invalid(label, "expected [\"type\", value] pair")),
                };
                let position = cases
                    .iter()
                    .position(|(n, _)| n == case_name)
                    .ok_or_else(|| AbiError::invalid(label, format!("'{case_name}' is not a case of this variant")))?;
                w.write_varuint32(position as u32);
                self.encode_node(cases[position].1, case_value, w, depth + 1)
            }
        }
    }

    /// Returns `false` once a missing extension field ended serialization.
    fn encode_struct(
        &self,
        idx: usize,
        object: &Map<String, Value>,
        w: &mut SerialWriter,
        depth: usize,
    ) -> Result<bool, AbiError> {
        if depth > MAX_DEPTH {
            return Err(AbiError::RecursionLimit(self.labels[idx].clone()));
        }
        let Node::Struct { base, fields } = &self.nodes[idx] else {
            return Err(AbiError::invalid(&self.labels[idx], "base type is not a struct"));
        };
        if let Some(base) = base {
            if !self.encode_struct(*base, object, w, depth + 1)? {
                return Ok(false);
            }
        }
        for (field, field_idx) in fields {
            match object.get(field) {
                Some(v) => self.encode_node(*field_idx, v, w, depth + 1)?,
                None if matches!(self.nodes[*field_idx], Node::Extension(_)) => return Ok(false),
                None => {
                    return Err(AbiError::invalid(
                        &self.labels[idx],
                        format!("missing field '{field}'"),
                    ))
                }
            }
        }
        Ok(true)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Container {
    Array,
    Optional,
    Extension,
}

fn strip_container(name: &str) -> Option<(Container, &str)> {
    if let Some(inner) = name.strip_suffix('$') {
        Some((Container::Extension, inner))
    } else if let Some(inner) = name.strip_suffix('?') {
        Some((Container::Optional, inner))
    } else {
        name.strip_suffix("[]").map(|inner| (Container::Array, inner))
    }
}

fn read_flag(label: &str, r: &mut SerialReader<'_>) -> Result<bool, AbiError> {
    match r.read_u8()? {
        0 => Ok(false),
        1 => Ok(true),
        b => Err(AbiError::invalid(label, format!("optional flag {b} is not 0 or 1"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn token_abi() -> Abi {
        serde_json::from_value(json!({
            "version": "eosio::abi/1.1",
            "types": [{ "new_type_name": "account_name", "type": "name" }],
            "structs": [
                {
                    "name": "transfer",
                    "base": "",
                    "fields": [
                        { "name": "from", "type": "account_name" },
                        { "name": "to", "type": "account_name" },
                        { "name": "quantity", "type": "asset" },
                        { "name": "memo", "type": "string" }
                    ]
                },
                {
                    "name": "account",
                    "base": "",
                    "fields": [
                        { "name": "balance", "type": "asset" },
                        { "name": "tags", "type": "string[]" },
                        { "name": "note", "type": "string?" },
                        { "name": "extra", "type": "uint32$" }
                    ]
                },
                { "name": "base_row", "base": "", "fields": [{ "name": "id", "type": "uint64" }] },
                { "name": "child_row", "base": "base_row", "fields": [{ "name": "flag", "type": "bool" }] }
            ],
            "variants": [{ "name": "any_row", "types": ["base_row", "child_row"] }],
            "actions": [{ "name": "transfer", "type": "transfer", "ricardian_contract": "" }],
            "tables": [{ "name": "accounts", "index_type": "i64", "key_names": [], "key_types": [], "type": "account" }]
        }))
        .unwrap()
    }

    #[test]
    fn transfer_action_encodes_and_decodes() {
        let table = TypeTable::new(&token_abi()).unwrap();
        let value = json!({
            "from": "alice",
            "to": "bob",
            "quantity": "1.0000 EOS",
            "memo": "hi"
        });
        let bytes = table.encode("transfer", &value).unwrap();
        assert_eq!(bytes.len(), 8 + 8 + 16 + 3);
        assert_eq!(table.decode("transfer", &bytes).unwrap(), value);
    }

    #[test]
    fn trailing_bytes_rejected_only_when_checked() {
        let table = TypeTable::new(&token_abi()).unwrap();
        let mut bytes = table.encode("base_row", &json!({ "id": "9" })).unwrap();
        bytes.push(0xff);
        assert!(matches!(
            table.decode("base_row", &bytes),
            Err(AbiError::TrailingBytes { remaining: 1, .. })
        ));
        assert_eq!(table.decode_with("base_row", &bytes, false).unwrap(), json!({ "id": "9" }));
    }

    #[test]
    fn extension_field_omitted_when_absent() {
        let table = TypeTable::new(&token_abi()).unwrap();
        let row = json!({ "balance": "0.5000 EOS", "tags": ["a", "b"], "note": null });
        let bytes = table.encode("account", &row).unwrap();
        assert_eq!(table.decode("account", &bytes).unwrap(), row);

        let with_extra = json!({ "balance": "0.5000 EOS", "tags": [], "note": "x", "extra": 3 });
        let bytes = table.encode("account", &with_extra).unwrap();
        assert_eq!(table.decode("account", &bytes).unwrap(), with_extra);
    }

    #[test]
    fn variants_and_inheritance() {
        let table = TypeTable::new(&token_abi()).unwrap();
        let value = json!(["child_row", { "id": "1", "flag": true }]);
        let bytes = table.encode("any_row", &value).unwrap();
        assert_eq!(bytes[0], 1);
        assert_eq!(table.decode("any_row", &bytes).unwrap(), value);

        let bad = [5u8];
        assert!(table.decode("any_row", &bad).is_err());
    }

    #[test]
    fn suffixes_resolve_at_lookup() {
        let table = TypeTable::new(&token_abi()).unwrap();
        assert!(table.has_type("transfer[]"));
        assert!(table.has_type("account_name?"));
        assert!(!table.has_type("nope[]"));

        let list = json!([{ "id": "1" }, { "id": "2" }]);
        let bytes = table.encode("base_row[]", &list).unwrap();
        assert_eq!(table.decode("base_row[]", &bytes).unwrap(), list);
    }

    #[test]
    fn unknown_field_type_fails_compilation() {
        let abi: Abi = serde_json::from_value(json!({
            "version": "eosio::abi/1.1",
            "structs": [{ "name": "s", "base": "", "fields": [{ "name": "x", "type": "mystery" }] }]
        }))
        .unwrap();
        assert!(matches!(TypeTable::new(&abi), Err(AbiError::UnknownType(t)) if t == "mystery"));
    }

    #[test]
    fn alias_cycle_detected() {
        let abi: Abi = serde_json::from_value(json!({
            "version": "eosio::abi/1.1",
            "types": [
                { "new_type_name": "a", "type": "b" },
                { "new_type_name": "b", "type": "a" }
            ]
        }))
        .unwrap();
        assert!(TypeTable::new(&abi).is_err());
    }

    #[test]
    fn self_referencing_struct_hits_depth_limit() {
        let abi: Abi = serde_json::from_value(json!({
            "version": "eosio::abi/1.1",
            "structs": [{ "name": "loop", "base": "loop", "fields": [] }]
        }))
        .unwrap();
        let table = TypeTable::new(&abi).unwrap();
        assert!(matches!(table.decode("loop", &[]), Err(AbiError::RecursionLimit(_))));
    }
}
