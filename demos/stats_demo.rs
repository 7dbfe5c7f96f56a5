use clap::Parser;
use swiss_hash::HashMap;

#[derive(Parser, Debug)]
struct Args {
    #[arg(short = 'c', long = "target_capacity", default_value_t = 1000)]
    target_capacity: usize,

    /// Erase-then-insert rounds to run after filling, to build up tombstones.
    #[arg(short = 'r', long = "churn_rounds", default_value_t = 0)]
    churn_rounds: usize,
}

fn main() {
    let args = Args::parse();

    println!(
        "Creating HashMap with target capacity: {}",
        args.target_capacity
    );

    let mut map: HashMap<u64, u64> = HashMap::with_capacity(args.target_capacity);

    println!("Actual capacity: {}", map.capacity());
    println!("Filling map with u64 keys...");

    let num_values = map.capacity() as u64;
    for key in 0..num_values {
        let (_, inserted) = map.try_emplace(key, key * 10);
        assert!(inserted, "key {key} inserted twice");
    }

    println!("Inserted {} keys", map.len());
    map.stats().print();

    if args.churn_rounds > 0 {
        println!("\nChurning {} rounds...", args.churn_rounds);
        // Sliding window: the oldest live key goes out as each new one comes in.
        for next in num_values..num_values + args.churn_rounds as u64 {
            map.erase(&(next - num_values));
            map.try_emplace(next, next * 10);
        }
        println!("Live keys after churn: {}", map.len());
        map.stats().print();
    }
}
