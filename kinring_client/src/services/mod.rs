pub mod check_in;
pub mod help_exchange;
pub mod member_status;
pub mod photos;
pub mod pings;
pub mod profile;
pub mod symptoms;

/// Collection path for a circle-scoped subcollection.
pub(crate) fn circle_collection(circle_id: &str, subcollection: &str) -> String {
    format!("circles/{circle_id}/{subcollection}")
}
