//! Load zipped archives of newline-delimited tweet JSON into a normalized
//! Postgres schema.
//!
//! Every insert is conflict-suppressed, so reprocessing an archive, or a
//! batch that rolled back, is always safe. Forward references (a reply to an
//! author we have not seen yet, a mentioned account) are satisfied by stub
//! author rows that a later hydrated row never overwrites.

pub mod archive;
pub mod batch;
pub mod db;
pub mod error;
pub mod interner;
pub mod model;
pub mod normalize;
pub mod pipeline;
pub mod sql;
pub mod writer;

pub mod util {
    pub mod env;
}
