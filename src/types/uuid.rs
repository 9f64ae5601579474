//! `uuid` crate integration.

use crate::error::{Error, Result};

use super::{FromPresent, FromValue, PgValue, Value, reject_null};

impl From<uuid::Uuid> for PgValue {
    fn from(value: uuid::Uuid) -> Self {
        PgValue::Uuid(value.into_bytes())
    }
}

impl FromPresent for uuid::Uuid {
    fn from_present(value: PgValue) -> Result<Self> {
        match value {
            PgValue::Uuid(bytes) => Ok(uuid::Uuid::from_bytes(bytes)),
            other => Err(Error::Decode(format!(
                "cannot assign {} to Uuid",
                other.kind()
            ))),
        }
    }
}

impl FromValue for uuid::Uuid {
    fn from_value(value: Value) -> Result<Self> {
        reject_null(value, "Uuid")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_round_trip() {
        let id = uuid::Uuid::from_u128(0xa0ee_bc99_9c0b_4ef8_bb6d_6bb9_bd38_0a11);
        let value = Value::from(id);
        assert_eq!(uuid::Uuid::from_value(value).unwrap(), id);
        assert_eq!(Option::<uuid::Uuid>::from_value(Value::Null).unwrap(), None);
    }
}
