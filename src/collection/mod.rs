pub mod autofill;
pub mod recurring;

pub use autofill::{autofill, autofill_for_update, generate_uuid, AutofillOptions};
pub use recurring::materialize_due;
