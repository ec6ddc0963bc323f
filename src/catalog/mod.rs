//! Message schema catalog and variable catalog.
//!
//! Both catalogs are owned outside this crate and only read here. The schema
//! catalog maps a frame id to its message definition and per-signal decode
//! rules; the variable catalog assigns stable integer ids to signal names.

mod dbc;

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Frame ids are masked to the 29-bit extended range.
pub const EXTENDED_MASK: u32 = 0x1FFF_FFFF;
/// Payload length every frame is decoded against.
pub const PAYLOAD_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ByteOrder {
    /// Intel layout; `start_bit` is the least significant bit.
    LittleEndian,
    /// Motorola layout; `start_bit` is the most significant bit in DBC numbering.
    BigEndian,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Multiplex {
    #[default]
    Plain,
    /// Carries the selector value for multiplexed siblings.
    Switch,
    /// Present only when the switch equals this value.
    Selected(u64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalDef {
    pub name: String,
    pub start_bit: u16,
    pub size: u16,
    pub byte_order: ByteOrder,
    #[serde(default)]
    pub signed: bool,
    #[serde(default = "unit_factor")]
    pub factor: f64,
    #[serde(default)]
    pub offset: f64,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub multiplex: Multiplex,
}

fn unit_factor() -> f64 {
    1.0
}

impl SignalDef {
    pub fn new(name: impl Into<String>, start_bit: u16, size: u16, byte_order: ByteOrder) -> Self {
        Self {
            name: name.into(),
            start_bit,
            size,
            byte_order,
            signed: false,
            factor: 1.0,
            offset: 0.0,
            unit: String::new(),
            multiplex: Multiplex::Plain,
        }
    }

    pub fn with_scale(mut self, factor: f64, offset: f64) -> Self {
        self.factor = factor;
        self.offset = offset;
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    pub fn signed(mut self) -> Self {
        self.signed = true;
        self
    }

    pub fn with_multiplex(mut self, multiplex: Multiplex) -> Self {
        self.multiplex = multiplex;
        self
    }

    /// Shift that moves the signal's least significant bit to bit 0 of the
    /// payload word for this byte order.
    fn shift(&self) -> Option<u32> {
        let size = u32::from(self.size);
        let start = u32::from(self.start_bit);
        if size == 0 || size > 64 {
            return None;
        }
        match self.byte_order {
            ByteOrder::LittleEndian => (start + size <= 64).then_some(start),
            ByteOrder::BigEndian => {
                // Position of the msb when bit 0 is the msb of byte 0.
                let msb = (start / 8) * 8 + (7 - start % 8);
                (msb + size <= 64).then(|| 64 - (msb + size))
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.shift().is_none() {
            return Err(Error::Format(format!(
                "signal {} does not fit in an {PAYLOAD_LEN}-byte payload (start {}, size {})",
                self.name, self.start_bit, self.size
            )));
        }
        Ok(())
    }

    /// Raw bit field, before sign extension and scaling.
    pub fn raw(&self, payload: &[u8; PAYLOAD_LEN]) -> u64 {
        let Some(shift) = self.shift() else {
            return 0;
        };
        let word = match self.byte_order {
            ByteOrder::LittleEndian => u64::from_le_bytes(*payload),
            ByteOrder::BigEndian => u64::from_be_bytes(*payload),
        };
        let mask = if self.size >= 64 {
            u64::MAX
        } else {
            (1u64 << self.size) - 1
        };
        (word >> shift) & mask
    }

    /// Physical value: sign-extended raw field times factor plus offset.
    pub fn decode(&self, payload: &[u8; PAYLOAD_LEN]) -> f64 {
        let raw = self.raw(payload);
        let negative = self.signed
            && (1..64).contains(&self.size)
            && raw & (1u64 << (self.size - 1)) != 0;
        let value = if negative {
            (raw as i64 - (1i64 << self.size)) as f64
        } else if self.signed {
            raw as i64 as f64
        } else {
            raw as f64
        };
        value * self.factor + self.offset
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageDef {
    pub id: u32,
    pub name: String,
    #[serde(default)]
    pub senders: Vec<String>,
    pub signals: Vec<SignalDef>,
}

impl MessageDef {
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        Self {
            id: id & EXTENDED_MASK,
            name: name.into(),
            senders: Vec::new(),
            signals: Vec::new(),
        }
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.senders.push(sender.into());
        self
    }

    pub fn with_signal(mut self, signal: SignalDef) -> Self {
        self.signals.push(signal);
        self
    }

    /// Messages are assumed to have a single sender on the bus.
    pub fn sender(&self) -> &str {
        self.senders.first().map(String::as_str).unwrap_or("")
    }

    fn switch(&self) -> Option<&SignalDef> {
        self.signals
            .iter()
            .find(|signal| signal.multiplex == Multiplex::Switch)
    }

    /// Signals present in this payload: every plain signal, plus multiplexed
    /// signals whose selector matches the switch value.
    pub fn active_signals<'a>(
        &'a self,
        payload: &'a [u8; PAYLOAD_LEN],
    ) -> impl Iterator<Item = &'a SignalDef> + 'a {
        let selector = self.switch().map(|switch| switch.raw(payload));
        self.signals.iter().filter(move |signal| match signal.multiplex {
            Multiplex::Plain | Multiplex::Switch => true,
            Multiplex::Selected(value) => selector == Some(value),
        })
    }
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    messages: Vec<MessageDef>,
}

/// Frame id to message definition lookup.
#[derive(Debug, Clone, Default)]
pub struct SchemaCatalog {
    messages: BTreeMap<u32, MessageDef>,
}

impl SchemaCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a catalog; `.dbc` files are parsed as CAN databases, anything else
    /// as JSON `{"messages": [...]}`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let is_dbc = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("dbc"))
            .unwrap_or(false);
        if is_dbc {
            Self::from_dbc_str(&text)
        } else {
            Self::from_json_str(&text)
        }
    }

    pub fn from_dbc_str(text: &str) -> Result<Self> {
        Self::from_messages(dbc::parse(text)?)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let file: CatalogFile = serde_json::from_str(text)?;
        Self::from_messages(file.messages)
    }

    pub fn from_messages(messages: impl IntoIterator<Item = MessageDef>) -> Result<Self> {
        let mut catalog = Self::new();
        for message in messages {
            catalog.insert(message)?;
        }
        Ok(catalog)
    }

    pub fn insert(&mut self, mut message: MessageDef) -> Result<()> {
        for signal in &message.signals {
            signal.validate()?;
        }
        message.id &= EXTENDED_MASK;
        self.messages.insert(message.id, message);
        Ok(())
    }

    pub fn get(&self, frame_id: u32) -> Option<&MessageDef> {
        self.messages.get(&(frame_id & EXTENDED_MASK))
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn messages(&self) -> impl Iterator<Item = &MessageDef> {
        self.messages.values()
    }
}

/// A column identity. Ids are assigned by the external catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableRef {
    pub id: i32,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub units: Option<String>,
}

impl VariableRef {
    pub fn new(id: i32, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            description: None,
            units: None,
        }
    }
}

/// Ordered list of known variables.
#[derive(Debug, Clone, Default)]
pub struct VariableCatalog {
    variables: Vec<VariableRef>,
}

impl VariableCatalog {
    pub fn new(variables: Vec<VariableRef>) -> Result<Self> {
        let mut seen = std::collections::HashSet::new();
        for variable in &variables {
            if !seen.insert(variable.name.as_str()) {
                return Err(Error::Format(format!(
                    "duplicate variable name {:?} in catalog",
                    variable.name
                )));
            }
        }
        Ok(Self { variables })
    }

    /// Load a JSON array of variables.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read(path.as_ref())?;
        let variables: Vec<VariableRef> = serde_json::from_slice(&data)?;
        Self::new(variables)
    }

    pub fn iter(&self) -> impl Iterator<Item = &VariableRef> {
        self.variables.iter()
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    pub fn by_name(&self, name: &str) -> Option<&VariableRef> {
        self.variables.iter().find(|v| v.name == name)
    }

    pub fn by_id(&self, id: i32) -> Option<&VariableRef> {
        self.variables.iter().find(|v| v.id == id)
    }

    /// Catalog entries whose name was observed, in catalog order.
    pub fn filter_observed(&self, observed: impl Fn(&str) -> bool) -> Vec<VariableRef> {
        self.variables
            .iter()
            .filter(|v| observed(&v.name))
            .cloned()
            .collect()
    }

    /// Requested ids in request order; ids the catalog does not know are dropped.
    pub fn resolve(&self, ids: &[i32]) -> Vec<VariableRef> {
        let mut resolved = Vec::with_capacity(ids.len());
        for &id in ids {
            match self.by_id(id) {
                Some(variable) => resolved.push(variable.clone()),
                None => log::warn!("variable id {id} is not in the catalog"),
            }
        }
        resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn little_endian_field() {
        let signal = SignalDef::new("rpm", 8, 16, ByteOrder::LittleEndian);
        let payload = [0x00, 0x34, 0x12, 0, 0, 0, 0, 0];
        assert_eq!(signal.raw(&payload), 0x1234);
    }

    #[test]
    fn big_endian_field() {
        // Motorola msb at bit 7 of byte 0, spanning bytes 0-1.
        let signal = SignalDef::new("speed", 7, 16, ByteOrder::BigEndian);
        let payload = [0x12, 0x34, 0, 0, 0, 0, 0, 0];
        assert_eq!(signal.raw(&payload), 0x1234);

        // Nibble in the low half of byte 2.
        let nibble = SignalDef::new("gear", 19, 4, ByteOrder::BigEndian);
        let payload = [0, 0, 0xA5, 0, 0, 0, 0, 0];
        assert_eq!(nibble.raw(&payload), 0x5);
    }

    #[test]
    fn signed_and_scaled() {
        let signal = SignalDef::new("temp", 0, 8, ByteOrder::LittleEndian)
            .signed()
            .with_scale(0.5, -10.0);
        let payload = [0xFE, 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(signal.decode(&payload), -2.0 * 0.5 - 10.0);
    }

    #[test]
    fn oversized_signal_rejected() {
        let signal = SignalDef::new("bad", 60, 8, ByteOrder::LittleEndian);
        assert!(signal.validate().is_err());
        let mut catalog = SchemaCatalog::new();
        let message = MessageDef::new(1, "Bad").with_signal(signal);
        assert!(catalog.insert(message).is_err());
    }

    #[test]
    fn multiplexed_signals_follow_switch() {
        let message = MessageDef::new(0x10, "Mux")
            .with_signal(
                SignalDef::new("page", 0, 8, ByteOrder::LittleEndian)
                    .with_multiplex(Multiplex::Switch),
            )
            .with_signal(
                SignalDef::new("a", 8, 8, ByteOrder::LittleEndian)
                    .with_multiplex(Multiplex::Selected(0)),
            )
            .with_signal(
                SignalDef::new("b", 8, 8, ByteOrder::LittleEndian)
                    .with_multiplex(Multiplex::Selected(1)),
            );
        let payload = [1, 7, 0, 0, 0, 0, 0, 0];
        let names: Vec<&str> = message
            .active_signals(&payload)
            .map(|s| s.name.as_str())
            .collect();
        assert_eq!(names, vec!["page", "b"]);
    }

    #[test]
    fn catalog_masks_frame_ids() {
        let catalog =
            SchemaCatalog::from_messages([MessageDef::new(0x8000_0123, "Ext")]).unwrap();
        assert!(catalog.get(0x123).is_some());
        assert!(catalog.get(0xE000_0123).is_some());
    }

    #[test]
    fn json_catalog() {
        let text = r#"{"messages": [{"id": 256, "name": "Engine", "senders": ["ECU"],
            "signals": [{"name": "rpm", "start_bit": 0, "size": 16,
                         "byte_order": "little_endian", "factor": 0.25, "unit": "rpm"}]}]}"#;
        let catalog = SchemaCatalog::from_json_str(text).unwrap();
        let message = catalog.get(256).unwrap();
        assert_eq!(message.sender(), "ECU");
        assert_eq!(message.signals[0].factor, 0.25);
        assert_eq!(message.signals[0].multiplex, Multiplex::Plain);
    }

    #[test]
    fn variable_catalog_resolution() {
        let catalog = VariableCatalog::new(vec![
            VariableRef::new(1, "rpm"),
            VariableRef::new(2, "speed"),
            VariableRef::new(3, "temp"),
        ])
        .unwrap();

        let observed = catalog.filter_observed(|name| name == "temp" || name == "rpm");
        let names: Vec<&str> = observed.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["rpm", "temp"]);

        let resolved = catalog.resolve(&[3, 99, 1]);
        let ids: Vec<i32> = resolved.iter().map(|v| v.id).collect();
        assert_eq!(ids, vec![3, 1]);
    }

    #[test]
    fn duplicate_variable_names_rejected() {
        let result = VariableCatalog::new(vec![VariableRef::new(1, "x"), VariableRef::new(2, "x")]);
        assert!(result.is_err());
    }
}
