pub mod structure;

pub use structure::{detect_box, AnalyzerSettings, BoxRejection, StructureAnalyzer, StructureCandidate, StructureParams};
