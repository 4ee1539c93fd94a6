fn main() {
    pomofly::run()
}
