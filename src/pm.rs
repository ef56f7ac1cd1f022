mod device;
mod device_status;
mod reading;
mod timestamp;

pub use device::*;
pub use device_status::*;
pub use reading::*;
pub use timestamp::*;
