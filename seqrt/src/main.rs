use clap::{Parser as ClapParser, Subcommand};
use std::process;

use seqrt::{
    BinaryOp, Heap, HeapCreateInfo, RuntimeError, RuntimeResult, UnaryOp, Value,
};

#[derive(ClapParser, Debug)]
#[command(author, version, about = "Drive the sequence runtime core", long_about = None)]
struct Cli {
    /// Cap the bytes the heap may hold
    #[arg(long, help = "Byte limit for the heap allocator")]
    memory_limit: Option<usize>,

    /// Print heap statistics after the command
    #[arg(long, help = "Print allocation statistics")]
    stats: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Append 1..=count to an empty sequence, one element at a time
    Append {
        #[arg(long, default_value_t = 10)]
        count: i64,
    },
    /// Build a chain of singleton sequences and release it
    DeepFree {
        #[arg(long, default_value_t = 100_000)]
        depth: usize,
    },
    /// Replace text[lo..hi] with a replacement string
    Splice {
        text: String,
        replacement: String,
        lo: i64,
        hi: i64,
    },
    /// Apply a binary operator between a scalar and each value
    Broadcast {
        /// operator name, e.g. add, power, <=
        op: String,
        #[arg(allow_hyphen_values = true)]
        scalar: i64,
        #[arg(allow_hyphen_values = true)]
        values: Vec<i64>,
    },
    /// Apply a unary operator to each value
    Map {
        /// operator name, e.g. negate, sqrt, floor
        op: String,
        #[arg(allow_hyphen_values = true)]
        values: Vec<i64>,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let mut heap = Heap::new(HeapCreateInfo {
        memory_limit: cli.memory_limit,
        ..Default::default()
    });

    match run(&mut heap, &cli.command) {
        Ok(output) => println!("{output}"),
        Err(err) => {
            eprintln!("Error: {err}");
            process::exit(1);
        }
    }

    if cli.stats {
        println!("{:#?}", heap.stats());
        println!("bytes in use: {}", heap.bytes_in_use());
    }
}

fn run(heap: &mut Heap, command: &Command) -> RuntimeResult<String> {
    match command {
        Command::Append { count } => {
            let mut seq = heap.new_empty_sequence()?;
            for i in 1..=*count {
                let item = heap.new_integer(i)?;
                heap.append(seq, item, &mut seq)?;
                heap.deref_value(item);
            }
            let output = format!(
                "length {} after {} storage reallocations",
                heap.length(seq)?,
                heap.stats().storage_reallocations
            );
            heap.deref_value(seq);
            Ok(output)
        }
        Command::DeepFree { depth } => {
            let mut chain = heap.new_empty_sequence()?;
            for _ in 0..*depth {
                let outer = heap.new_sequence(&[chain])?;
                heap.deref_value(chain);
                chain = outer;
            }
            let built = heap.live_blocks();
            heap.deref_value(chain);
            Ok(format!(
                "built {built} blocks, {} left after release",
                heap.live_blocks()
            ))
        }
        Command::Splice {
            text,
            replacement,
            lo,
            hi,
        } => {
            let mut target = heap.new_string(text)?;
            let replacement = match heap.new_string(replacement) {
                Ok(replacement) => replacement,
                Err(err) => {
                    heap.deref_value(target);
                    return Err(err);
                }
            };
            let result = heap.splice(target, replacement, *lo, *hi, &mut target);
            let output = result.map(|_| heap.render(target));
            heap.deref_all([target, replacement]);
            output
        }
        Command::Broadcast { op, scalar, values } => {
            let Some(op) = BinaryOp::from_name(op) else {
                return Err(RuntimeError::TypeMismatch("unknown binary operator"));
            };
            let scalar = heap.new_integer(*scalar)?;
            let values = match new_int_sequence(heap, values) {
                Ok(values) => values,
                Err(err) => {
                    heap.deref_value(scalar);
                    return Err(err);
                }
            };
            let result = heap.binary_op(op, scalar, values);
            let output = result.map(|result| {
                let rendered = heap.render(result);
                heap.deref_value(result);
                rendered
            });
            heap.deref_all([scalar, values]);
            output
        }
        Command::Map { op, values } => {
            let Some(op) = UnaryOp::from_name(op) else {
                return Err(RuntimeError::TypeMismatch("unknown unary operator"));
            };
            let values = new_int_sequence(heap, values)?;
            let result = heap.unary_op(op, values);
            let output = result.map(|result| {
                let rendered = heap.render(result);
                heap.deref_value(result);
                rendered
            });
            heap.deref_value(values);
            output
        }
    }
}

fn new_int_sequence(heap: &mut Heap, values: &[i64]) -> RuntimeResult<Value> {
    let mut items = Vec::with_capacity(values.len());
    for &value in values {
        match heap.new_integer(value) {
            Ok(item) => items.push(item),
            Err(err) => {
                heap.deref_all(items);
                return Err(err);
            }
        }
    }
    let seq = heap.new_sequence(&items);
    heap.deref_all(items);
    seq
}
