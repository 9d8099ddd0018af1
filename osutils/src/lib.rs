pub mod exe;
pub mod lsblk;
pub mod udevadm;

pub(crate) mod crate_private {
    pub trait Sealed {}
}
