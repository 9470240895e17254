pub mod status_file_reader;

pub use status_file_reader::FsStatusFileReader;
