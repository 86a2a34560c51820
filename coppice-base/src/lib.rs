mod error;

pub use error::{
    conflict_error, err, not_found, not_implemented, protocol_error, value_error, Error,
    ErrorKind, Result,
};
