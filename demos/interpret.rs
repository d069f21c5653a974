use clap::{Parser, ValueEnum};

use cesk_rs::class::ClassTable;
use cesk_rs::graph::BlockGraph;
use cesk_rs::instruction::{BinaryOp, IfCond, Instruction, Operand};
use cesk_rs::machine::Machine;
use cesk_rs::program::{Branch, Program};

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
enum Method {
    /// Sign arithmetic on constants.
    Arith,
    /// Objects allocated in a loop, summarized per allocation site.
    Alloc,
    /// Branch on a comparison of constants.
    Branch,
    /// All of the above.
    All,
}

#[derive(Debug, Parser)]
#[command(author, version)]
struct Cli {
    /// Method to interpret.
    #[arg(value_enum, default_value = "all")]
    method: Method,

    /// Log level.
    #[clap(long, value_name = "LEVEL", default_value = "info")]
    log: simplelog::LevelFilter,

    /// Set pool size (in bits, so the initial table has `2^bits` buckets).
    #[clap(long, value_name = "INT", default_value = "10")]
    bits: usize,
}

fn arith(program: &mut Program) -> color_eyre::Result<u32> {
    let code = program.push_code([
        Instruction::constant(0, Operand::int(5)),
        Instruction::constant(1, Operand::int(-3)),
        Instruction::binop(BinaryOp::Add, 2, Operand::register(0), Operand::register(1)),
        Instruction::binop(BinaryOp::Mul, 3, Operand::register(0), Operand::register(1)),
        Instruction::binop(BinaryOp::Div, 4, Operand::register(0), Operand::register(2)),
        Instruction::binop(BinaryOp::Shl, 5, Operand::register(0), Operand::int(1)),
    ]);
    Ok(program.push_block(code, 6, vec![])?)
}

fn alloc(program: &mut Program) -> color_eyre::Result<u32> {
    // b0: v1 = 1
    // b1: v0 = new Node; v0.next = v2; v0.value = v1; v2 = v0; loop
    // b2: return
    let init = program.push_code([Instruction::constant(1, Operand::int(1))]);
    let body = program.push_code([
        Instruction::new_instance(0, "demo/Node"),
        Instruction::iput(2, 0, "demo/Node", "next", "demo/Node"),
        Instruction::iput(1, 0, "demo/Node", "value", "int"),
        Instruction::mov(Operand::register(2), Operand::register(0)),
        Instruction::instance_of(3, 2, "demo/Base"),
    ]);
    let exit = program.push_code([Instruction::ret(Operand::register(2))]);
    let b0 = program.push_block(init, 4, vec![Branch::goto(1)])?;
    let b1 = program.push_block(body, 4, vec![])?;
    let b2 = program.push_block(exit, 4, vec![])?;
    let again = Branch::when(IfCond::Gt, Operand::register(1), None, b1);
    program.set_branches(b1, vec![again.clone(), again.otherwise(b2)])?;
    Ok(b0)
}

fn branch(program: &mut Program) -> color_eyre::Result<u32> {
    let head = program.push_code([
        Instruction::constant(0, Operand::int(-7)),
        Instruction::constant(1, Operand::int(2)),
        Instruction::cmp(2, Operand::register(0), Operand::register(1)),
    ]);
    let neg = program.push_code([Instruction::constant(3, Operand::boolean(true))]);
    let pos = program.push_code([Instruction::constant(3, Operand::boolean(false))]);
    let first = program.num_blocks() as u32;
    let taken = Branch::when(IfCond::Lt, Operand::register(0), Some(Operand::register(1)), first + 1);
    let b0 = program.push_block(head, 4, vec![taken.clone(), taken.otherwise(first + 2)])?;
    program.push_block(neg, 4, vec![])?;
    program.push_block(pos, 4, vec![])?;
    Ok(b0)
}

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let args = Cli::parse();

    simplelog::TermLogger::init(
        args.log,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )?;

    println!("args = {:?}", args);

    let mut classes = ClassTable::new();
    classes
        .define("demo/Base", Some("java/lang/Object"), &[])
        .define("demo/Node", Some("demo/Base"), &["next", "value"]);
    let m = Machine::with_pool_bits(&classes, args.bits);

    let mut program = Program::new();
    let mut entries = Vec::new();
    if matches!(args.method, Method::Arith | Method::All) {
        entries.push(("arith", arith(&mut program)?));
    }
    if matches!(args.method, Method::Alloc | Method::All) {
        entries.push(("alloc", alloc(&mut program)?));
    }
    if matches!(args.method, Method::Branch | Method::All) {
        entries.push(("branch", branch(&mut program)?));
    }

    for (name, entry) in entries {
        let time = std::time::Instant::now();
        let graph = BlockGraph::new(&program, entry, &m)?;
        println!("== {}: {} blocks", name, graph.len());
        for (block, output) in graph.walk(&program, &m)? {
            println!("-- block {} (hash = {:#018x})", block, output.hash(&m));
            print!("{}", output.display(&m));
        }
        println!("== {} done in {:.3}s", name, time.elapsed().as_secs_f64());
    }

    println!("machine = {:?}", m);

    Ok(())
}
