//! CAN database (`.dbc`) loading on top of `can-dbc`.
//!
//! Messages and signals are mapped onto [`MessageDef`] and [`SignalDef`];
//! value tables, comments and attributes are parsed but not kept.

use can_dbc::{MessageId, MultiplexIndicator, Transmitter, ValueType, DBC};

use super::{ByteOrder, MessageDef, Multiplex, SignalDef};
use crate::{Error, Result};

/// Pseudo message that holds signals not attached to any frame.
const INDEPENDENT_SIGNALS: &str = "VECTOR__INDEPENDENT_SIG_MSG";

pub(super) fn parse(text: &str) -> Result<Vec<MessageDef>> {
    let dbc = match DBC::try_from(text) {
        Ok(dbc) => dbc,
        Err(can_dbc::Error::Incomplete(_, rest)) => {
            let near = rest.lines().next().unwrap_or_default().trim();
            return Err(Error::Format(format!("dbc parse stopped at {near:?}")));
        }
        Err(err) => return Err(Error::Format(format!("dbc parse failed: {err:?}"))),
    };

    dbc.messages()
        .iter()
        .filter(|message| message.message_name() != INDEPENDENT_SIGNALS)
        .map(|message| {
            let id = match message.message_id() {
                MessageId::Standard(id) => u32::from(*id),
                MessageId::Extended(id) => *id,
            };
            let mut def = MessageDef::new(id, message.message_name().as_str());
            if let Transmitter::NodeName(node) = message.transmitter() {
                def.senders.push(node.clone());
            }
            def.signals = message
                .signals()
                .iter()
                .map(|signal| signal_def(message.message_name(), signal))
                .collect::<Result<_>>()?;
            Ok(def)
        })
        .collect()
}

fn signal_def(message: &str, signal: &can_dbc::Signal) -> Result<SignalDef> {
    let out_of_range = || {
        Error::Format(format!(
            "signal {message}.{} layout out of range",
            signal.name()
        ))
    };
    let start_bit = u16::try_from(*signal.start_bit()).map_err(|_| out_of_range())?;
    let size = u16::try_from(*signal.signal_size()).map_err(|_| out_of_range())?;
    let byte_order = match signal.byte_order() {
        can_dbc::ByteOrder::LittleEndian => ByteOrder::LittleEndian,
        can_dbc::ByteOrder::BigEndian => ByteOrder::BigEndian,
    };
    // A nested switch is decoded as one of its parent's branches.
    let multiplex = match signal.multiplexer_indicator() {
        MultiplexIndicator::Plain => Multiplex::Plain,
        MultiplexIndicator::Multiplexor => Multiplex::Switch,
        MultiplexIndicator::MultiplexedSignal(value)
        | MultiplexIndicator::MultiplexorAndMultiplexedSignal(value) => Multiplex::Selected(*value),
    };

    let mut def = SignalDef::new(signal.name().as_str(), start_bit, size, byte_order)
        .with_scale(*signal.factor(), *signal.offset())
        .with_unit(signal.unit().as_str())
        .with_multiplex(multiplex);
    def.signed = matches!(signal.value_type(), ValueType::Signed);
    Ok(def)
}
