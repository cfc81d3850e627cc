use std::env;
use std::fs;
use std::path::Path;
use std::process;

fn main() {
  let args: Vec<String> = env::args().collect();
  if args.len() != 2 {
    let program = args.first().map(String::as_str).unwrap_or("tacc");
    eprintln!("usage: {program} <file.c>");
    process::exit(1);
  }

  let input = Path::new(&args[1]);
  let source = match fs::read_to_string(input) {
    Ok(source) => source,
    Err(err) => {
      eprintln!("{}: {err}", input.display());
      process::exit(1);
    }
  };

  match tacc::compile(&source) {
    Ok(asm) => {
      let output = input.with_extension("s");
      if let Err(err) = fs::write(&output, asm) {
        eprintln!("{}: {err}", output.display());
        process::exit(1);
      }
    }
    Err(err) => {
      eprintln!("{err}");
      process::exit(1);
    }
  }
}
