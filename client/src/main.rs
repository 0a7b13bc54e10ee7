fn main() -> anyhow::Result<()> {
    blockmap::run()
}
