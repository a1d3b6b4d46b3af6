fn main() {
    storyreel_lib::run()
}
