//! Control-plane and data-plane subject names

/// Producer registration requests
pub const PRODUCER_CREATIONS_SUBJECT: &str = "producer-creations";

/// Producer removal requests
pub const PRODUCER_DESTRUCTIONS_SUBJECT: &str = "producer-destructions";

const SCHEMA_UPDATES_PREFIX: &str = "schema-updates.";
const DATA_SUBJECT_SUFFIX: &str = ".final";

/// Broker-side form of a station name: lower-cased, dots replaced by `#`
pub fn internal_station_name(station: &str) -> String {
    station.to_lowercase().replace('.', "#")
}

/// Subject the control plane pushes schema updates for `station` on
pub fn schema_updates_subject(station: &str) -> String {
    format!("{}{}", SCHEMA_UPDATES_PREFIX, internal_station_name(station))
}

/// Subject messages for `station` are published to
pub fn station_data_subject(station: &str) -> String {
    format!("{}{}", internal_station_name(station), DATA_SUBJECT_SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_derivation() {
        assert_eq!(station_data_subject("orders"), "orders.final");
        assert_eq!(schema_updates_subject("orders"), "schema-updates.orders");
    }

    #[test]
    fn test_internal_name_normalisation() {
        assert_eq!(internal_station_name("Orders.EU"), "orders#eu");
        assert_eq!(station_data_subject("Orders.EU"), "orders#eu.final");
    }
}
