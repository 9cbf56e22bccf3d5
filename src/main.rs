use loadherd::error::AppResult;

fn main() -> AppResult<()> {
    loadherd::entry::run()
}
