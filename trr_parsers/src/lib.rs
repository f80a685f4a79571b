pub mod trr;
pub use trr::{
    Trr,
    TrrHeader,
    TrrFrameView,
    write_frame,
};
