fn main() {
    if let Err(error) = journal_list::run() {
        eprintln!("journal-list: {error:#}");
        std::process::exit(1);
    }
}
