//! Domain types for quotevault

pub mod record;
pub mod request;

pub use record::{CanonicalRecord, RecordSeries, TimestampFault, COLUMNS};
pub use request::{check_symbol, DateRange, FetchRequest, ParseTagError, Period, Provider};
