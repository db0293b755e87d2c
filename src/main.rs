//! Test platform controller entry point

fn main() {
    testplatform::cli::run();
}
