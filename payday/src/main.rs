#![warn(clippy::uninlined_format_args)]

mod bootstrap;

fn main() {
    bootstrap::run();
}
