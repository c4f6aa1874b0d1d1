fn main() {
    among::cli::run();
}
