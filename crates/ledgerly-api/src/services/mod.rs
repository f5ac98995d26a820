pub mod delivery_gate;
pub mod export;

pub use delivery_gate::{unlock_path, DeliveryGate, DenialReason, ExportedFile, GateDecision};
pub use export::{export_filename, render_xlsx, ExportError, XLSX_CONTENT_TYPE};
