pub mod frame_gate;
pub mod image;
pub mod localizer;
pub mod presets;
pub mod tracker;

pub use frame_gate::FrameGate;
pub use image::ImageProcessor;
pub use localizer::{BandLocalizer, LocalizerParams};
pub use presets::{InMemoryPresetStore, JsonFilePresetStore, PreprocessParams, PresetKey, PresetStore};
pub use tracker::{BoxAverager, MrzTracker, RoiTracker, TrackerParams};
