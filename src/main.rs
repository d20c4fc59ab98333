fn main() {
    magpie::run();
}
