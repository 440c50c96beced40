use queued::run;

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(error) => {
            eprintln!("queued process failed: {error:?}");
            std::process::exit(1);
        }
    }
}
