//! Column family and key layout for the RocksDB ticket store

/// Column family holding one JSON document per ticket
pub const CF_TICKETS: &str = "tickets";

/// All column family names
pub const ALL_CFS: &[&str] = &[CF_TICKETS];

/// Key prefixes for compound keys
pub mod keys {
    pub const TICKET_PREFIX: &str = "ticket:";

    /// Create a ticket key
    pub fn ticket(ticket_id: &str) -> String {
        format!("{}{}", TICKET_PREFIX, ticket_id)
    }
}
