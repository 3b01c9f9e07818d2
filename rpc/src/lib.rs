extern crate bytes;
extern crate prost;
extern crate prost_derive;
extern crate tonic;

/// Container Storage Interface v1 messages and services.
#[allow(clippy::derive_partial_eq_without_eq)]
#[allow(clippy::upper_case_acronyms)]
pub mod csi {
    include!(concat!(env!("OUT_DIR"), "/csi.v1.rs"));
}
