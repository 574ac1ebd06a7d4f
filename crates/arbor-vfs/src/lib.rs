pub mod memory;
pub mod traits;
#[cfg(unix)]
pub mod unix;

pub use memory::{MemoryFile, MemoryVfs};
pub use traits::{Vfs, VfsFile, read_whole_file, write_whole_file};
#[cfg(unix)]
pub use unix::{UnixFile, UnixVfs};
