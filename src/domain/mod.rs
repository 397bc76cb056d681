pub mod horizon;
pub mod mode;
pub mod objective;
pub mod resources;

pub use horizon::*;
pub use mode::*;
pub use objective::*;
pub use resources::*;
