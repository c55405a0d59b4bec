fn main() -> anyhow::Result<()> {
    let matches = serterm::cli::parse_args();
    serterm::boot::init_logging(!matches.get_flag("list-ports"));
    serterm::boot::run(&matches)
}
