//! Main entry point for CLI command to inspect compiled collection schemas.

fn main() -> anyhow::Result<()> {
    collection_graphql::main()
}
