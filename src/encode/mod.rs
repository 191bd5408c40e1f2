//! Columnar batch encoding — Parquet files with the fixed aviation schema.

mod parquet_writer;
mod sanitize;
mod schema;

pub use parquet_writer::{encode_batch, EncodeError, EncodedBatch};
pub use sanitize::{safe_boolean, safe_number, safe_string};
pub use schema::aviation_schema;
