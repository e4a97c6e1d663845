pub mod window;

pub use window::WindowSink;
