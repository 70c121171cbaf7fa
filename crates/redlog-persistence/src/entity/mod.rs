//! SeaORM entity definitions

pub mod log_record;
pub mod log_tag;
pub mod tag;

pub mod prelude {
    pub use super::log_record::Entity as LogRecord;
    pub use super::log_tag::Entity as LogTag;
    pub use super::tag::Entity as Tag;
}
