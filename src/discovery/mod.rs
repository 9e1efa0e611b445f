pub mod radar;

pub use radar::{Radar, Target, VolumeTiers};
