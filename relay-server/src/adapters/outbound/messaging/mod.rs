pub mod change_broadcaster;

pub use change_broadcaster::ChangeBroadcaster;
