// src/processor/intent.rs
//! Intents and result codes

use crate::game::object::ObjectId;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A one-tick request to perform `verb` on `object`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub object: ObjectId,
    pub verb: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

impl Intent {
    pub fn new(object: ObjectId, verb: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            object,
            verb: verb.into(),
            args,
        }
    }
}

/// Closed set of validation outcomes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ResultCode {
    Ok = 0,
    NotOwner = -1,
    NoPath = -2,
    Busy = -4,
    NotEnoughResources = -6,
    InvalidTarget = -7,
    Full = -8,
    NotInRange = -9,
    InvalidArgs = -10,
    Tired = -11,
    NoBodyPart = -12,
}

impl ResultCode {
    pub const ALL: [ResultCode; 11] = [
        ResultCode::Ok,
        ResultCode::NotOwner,
        ResultCode::NoPath,
        ResultCode::Busy,
        ResultCode::NotEnoughResources,
        ResultCode::InvalidTarget,
        ResultCode::Full,
        ResultCode::NotInRange,
        ResultCode::InvalidArgs,
        ResultCode::Tired,
        ResultCode::NoBodyPart,
    ];

    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.code() == code)
    }

    pub fn is_ok(self) -> bool {
        self == ResultCode::Ok
    }

    /// Constant name exported to sandboxed code
    pub fn name(self) -> &'static str {
        match self {
            ResultCode::Ok => "OK",
            ResultCode::NotOwner => "ERR_NOT_OWNER",
            ResultCode::NoPath => "ERR_NO_PATH",
            ResultCode::Busy => "ERR_BUSY",
            ResultCode::NotEnoughResources => "ERR_NOT_ENOUGH_RESOURCES",
            ResultCode::InvalidTarget => "ERR_INVALID_TARGET",
            ResultCode::Full => "ERR_FULL",
            ResultCode::NotInRange => "ERR_NOT_IN_RANGE",
            ResultCode::InvalidArgs => "ERR_INVALID_ARGS",
            ResultCode::Tired => "ERR_TIRED",
            ResultCode::NoBodyPart => "ERR_NO_BODYPART",
        }
    }
}

impl Serialize for ResultCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(self.code())
    }
}

impl<'de> Deserialize<'de> for ResultCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = i32::deserialize(deserializer)?;
        ResultCode::from_code(code).ok_or_else(|| serde::de::Error::custom(format!("unknown result code {}", code)))
    }
}

/// Result of one applied intent, reported back to its user next tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentOutcome {
    pub object: ObjectId,
    pub verb: String,
    pub code: ResultCode,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_intent_from_json() {
        let id = ObjectId::generate();
        let intent: Intent = serde_json::from_value(json!({
            "object": id.to_string(),
            "verb": "move",
            "args": { "direction": 3 }
        }))
        .unwrap();
        assert_eq!(intent.object, id);
        assert_eq!(intent.args["direction"], 3);
    }

    #[test]
    fn test_result_code_serializes_as_number() {
        let outcome = IntentOutcome {
            object: ObjectId::generate(),
            verb: "transfer".to_string(),
            code: ResultCode::Full,
        };
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["code"], -8);
        let back: IntentOutcome = serde_json::from_value(value).unwrap();
        assert_eq!(back, outcome);
    }
}
