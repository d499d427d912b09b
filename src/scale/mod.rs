pub mod felicita;
pub mod sink;
pub mod traits;

pub use felicita::FelicitaScale;
pub use traits::{Basic, Buzzer, Scale, Timer};
