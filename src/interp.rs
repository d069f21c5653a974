//! Abstract transfer functions and the block interpreter.
//!
//! [`interpret_block`] forks the input frame of a block and applies the transfer function of each
//! instruction in program order. A failing instruction is logged and skipped; the frame keeps
//! whatever the instruction managed to do before failing, and interpretation goes on with the
//! next instruction.

use log::{debug, trace, warn};

use crate::address::{Address, Sign};
use crate::arith;
use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::instruction::{
    ArrayOp, BinaryOp, InstanceOp, Instruction, MonitorOp, Opcode, Operand, OperandType, Payload, SwitchOp,
    UnaryOp,
};
use crate::machine::Machine;
use crate::program::{CodeBlock, InstIndex, Program};

/// Register named by an operand.
pub fn operand_to_register(frame: &Frame, operand: &Operand) -> Result<usize> {
    if operand.is_const() {
        return Err(Error::Unsupported(format!("constant {} used as a register", operand)));
    }
    if operand.ty() == OperandType::Exception {
        return Ok(frame.exception_register());
    }
    if operand.header.is_result {
        return Ok(frame.result_register());
    }
    match operand.payload {
        Payload::Register(reg) => Ok(reg as usize),
        _ => Err(Error::Unsupported(format!("operand {} is not a register", operand))),
    }
}

/// Abstract integer of a constant operand.
pub fn constant_sign(operand: &Operand) -> Result<Sign> {
    match (operand.ty(), &operand.payload) {
        (OperandType::String, _) => Err(Error::Unsupported(
            "string constant requires java/lang/String".to_string(),
        )),
        (OperandType::Boolean, Payload::Int(v)) => Ok(Sign::of_bool(*v != 0)),
        (_, Payload::Int(v)) => Ok(Sign::of(*v)),
        (_, Payload::Float(v)) => Ok(Sign::of_float(*v)),
        _ => Err(Error::Unsupported(format!("constant {} is not a number", operand))),
    }
}

/// Abstract integer of an operand: the constant itself, or the union of the constants held by
/// the register. Other addresses in the register are ignored. [`Sign::EMPTY`] if there are none.
pub fn operand_to_sign(frame: &Frame, m: &Machine, operand: &Operand) -> Result<Sign> {
    if operand.is_const() {
        return constant_sign(operand);
    }
    let reg = operand_to_register(frame, operand)?;
    let mut sign = Sign::EMPTY;
    for addr in m.sets().iter(frame.register(reg)?) {
        match addr {
            Address::Const(s) => sign |= s,
            _ => warn!("the address {} in register {} is not a constant, ignoring", addr, reg),
        }
    }
    if sign.is_empty() {
        warn!("there is no constant in register {}", reg);
    }
    Ok(sign)
}

/// Interpret a block from its input frame and return the output frame.
pub fn interpret_block(program: &Program, block: &CodeBlock, input: &Frame, m: &Machine) -> Frame {
    let mut frame = input.fork();
    for (index, inst) in program.instructions(block) {
        debug!("current instruction #{}: {}", index, inst);
        if let Err(e) = interpret_instruction(&mut frame, m, index, inst) {
            warn!("skip instruction #{} `{}` at line {}: {}", index, inst, inst.line, e);
        }
    }
    frame
}

/// Apply the transfer function of one instruction.
pub fn interpret_instruction(frame: &mut Frame, m: &Machine, index: InstIndex, inst: &Instruction) -> Result<()> {
    match inst.opcode {
        Opcode::Nop => {
            debug!("current operation: nop");
            Ok(())
        }
        Opcode::Move => handle_move(frame, index, inst),
        Opcode::Const => handle_const(frame, m, index, inst),
        Opcode::Monitor => {
            inst.decode(index, MonitorOp::from_flags)?;
            debug!("current operation: monitor");
            trace!("fixme: threading analysis");
            Ok(())
        }
        Opcode::CheckCast => {
            debug!("current operation: check-cast");
            trace!("fixme: check-cast relies on the exception system");
            Ok(())
        }
        Opcode::Throw => {
            debug!("current operation: throw");
            trace!("fixme: throw is part of the exception system");
            Ok(())
        }
        Opcode::Return | Opcode::Goto | Opcode::If => {
            debug!("current operation: {}, resolved by the block branches", inst.opcode);
            Ok(())
        }
        Opcode::Switch => {
            let op = inst.decode(index, SwitchOp::from_flags)?;
            debug!("current operation: {:?} switch, resolved by the block branches", op);
            Ok(())
        }
        Opcode::Invoke => {
            debug!("current operation: invoke");
            trace!("fixme: method invocation");
            Ok(())
        }
        Opcode::Cmp => handle_cmp(frame, m, index, inst),
        Opcode::Instance => match inst.decode(index, InstanceOp::from_flags)? {
            InstanceOp::Of => handle_instance_of(frame, m, index, inst),
            InstanceOp::New => handle_instance_new(frame, m, index, inst),
            InstanceOp::Get => handle_instance_get(frame, m, index, inst),
            InstanceOp::Put => handle_instance_put(frame, m, index, inst),
            InstanceOp::StaticGet | InstanceOp::StaticPut => {
                trace!("fixme: static field table");
                Ok(())
            }
        },
        Opcode::Array => {
            inst.decode(index, ArrayOp::from_flags)?;
            trace!("fixme: array support");
            Ok(())
        }
        Opcode::Unop => handle_unop(frame, m, index, inst),
        Opcode::Binop => handle_binop(frame, m, index, inst),
    }
}

fn register_operand(frame: &Frame, index: InstIndex, inst: &Instruction, i: usize) -> Result<usize> {
    operand_to_register(frame, inst.operand(index, i)?)
}

fn str_operand<'a>(index: InstIndex, inst: &'a Instruction, i: usize) -> Result<&'a str> {
    let operand = inst.operand(index, i)?;
    operand
        .as_str()
        .ok_or_else(|| Error::malformed(index, format!("operand {} is not a name", operand)))
}

/// Load a sign into a register; an empty sign clears it.
fn load_sign(frame: &mut Frame, m: &Machine, index: InstIndex, dest: usize, sign: Sign) -> Result<()> {
    if sign.is_empty() {
        warn!("the result set is empty, just clear register {}", dest);
        frame.register_clear(m, index, dest)
    } else {
        frame.register_load(m, index, dest, Address::Const(sign))
    }
}

fn handle_move(frame: &mut Frame, index: InstIndex, inst: &Instruction) -> Result<()> {
    let dest = register_operand(frame, index, inst, 0)?;
    let src = register_operand(frame, index, inst, 1)?;
    debug!("current operation: move register {} --> register {}", src, dest);
    frame.register_move(index, dest, src)
}

fn handle_const(frame: &mut Frame, m: &Machine, index: InstIndex, inst: &Instruction) -> Result<()> {
    let dest = register_operand(frame, index, inst, 0)?;
    let value = inst.operand(index, 1)?;
    if value.ty() == OperandType::String {
        trace!("fixme: string constant requires java/lang/String");
        return Ok(());
    }
    let sign = constant_sign(value)?;
    debug!("current operation: load constant {} --> register {}", sign, dest);
    frame.register_load(m, index, dest, Address::Const(sign))
}

fn handle_cmp(frame: &mut Frame, m: &Machine, index: InstIndex, inst: &Instruction) -> Result<()> {
    let dest = register_operand(frame, index, inst, 0)?;
    let a = operand_to_sign(frame, m, inst.operand(index, 1)?)?;
    let b = operand_to_sign(frame, m, inst.operand(index, 2)?)?;
    debug!("current operation: compare {} to {}", a, b);
    load_sign(frame, m, index, dest, arith::compare(a, b))
}

fn handle_instance_of(frame: &mut Frame, m: &Machine, index: InstIndex, inst: &Instruction) -> Result<()> {
    let dest = register_operand(frame, index, inst, 0)?;
    let src = register_operand(frame, index, inst, 1)?;
    let class = inst.operand(index, 2)?;
    match class.ty() {
        OperandType::Class => {}
        OperandType::TypeDesc => {
            trace!("fixme: instance-of for a type descriptor");
            return Ok(());
        }
        _ => return Err(Error::malformed(index, format!("instance-of a non-class {}", class))),
    }
    let classpath = str_operand(index, inst, 2)?;
    debug!(
        "current operation: is the object in register {} an instance of {} --> register {}",
        src, classpath, dest
    );

    let mut result = Sign::EMPTY;
    for addr in m.sets().iter(frame.register(src)?) {
        let value = match frame.store().get_ro(addr) {
            Ok(value) => value,
            Err(e) => {
                warn!("can not get value at {}: {}", addr, e);
                continue;
            }
        };
        match value.as_object() {
            Some(obj) => result |= Sign::of_bool(obj.instance_of(m.classes(), classpath)),
            None => warn!("the {} at {} is not an object", value.kind(), addr),
        }
    }
    if result.is_empty() {
        warn!("the result of instance-of is empty");
    }
    frame.register_load(m, index, dest, Address::Const(result))
}

fn handle_instance_new(frame: &mut Frame, m: &Machine, index: InstIndex, inst: &Instruction) -> Result<()> {
    let dest = register_operand(frame, index, inst, 0)?;
    let classpath = str_operand(index, inst, 1)?;
    frame.register(dest)?;
    debug!("current operation: new instance of {} --> register {}", classpath, dest);
    let addr = frame.store_new_object(m, index, classpath)?;
    frame.register_load(m, index, dest, addr)
}

fn handle_instance_get(frame: &mut Frame, m: &Machine, index: InstIndex, inst: &Instruction) -> Result<()> {
    let dest = register_operand(frame, index, inst, 0)?;
    let src = register_operand(frame, index, inst, 1)?;
    let classpath = str_operand(index, inst, 2)?;
    let field = str_operand(index, inst, 3)?;
    debug!(
        "current operation: field {}/{} of the objects in register {} --> register {}",
        classpath, field, src, dest
    );

    let objects = frame.register(src)?;
    frame.register_clear(m, index, dest)?;
    for addr in m.sets().iter(objects) {
        let field_addr = match frame.store_object_get(addr, classpath, field) {
            Ok(field_addr) => field_addr,
            Err(e) => {
                warn!("can not get member {}/{} of {}: {}", classpath, field, addr, e);
                continue;
            }
        };
        if field_addr.is_null() {
            continue;
        }
        if let Err(e) = frame.register_append_from_store(m, index, dest, field_addr) {
            warn!("can not read field {}/{} at {}: {}", classpath, field, field_addr, e);
        }
    }
    Ok(())
}

fn handle_instance_put(frame: &mut Frame, m: &Machine, index: InstIndex, inst: &Instruction) -> Result<()> {
    let src = register_operand(frame, index, inst, 0)?;
    let obj = register_operand(frame, index, inst, 1)?;
    let classpath = str_operand(index, inst, 2)?;
    let field = str_operand(index, inst, 3)?;
    frame.register(src)?;
    debug!(
        "current operation: register {} --> field {}/{} of the objects in register {}",
        src, classpath, field, obj
    );

    for addr in m.sets().iter(frame.register(obj)?) {
        if let Err(e) = frame.store_object_put(m, index, addr, classpath, field, src) {
            warn!(
                "can not put register {} into field {}/{} at {}: {}",
                src, classpath, field, addr, e
            );
        }
    }
    Ok(())
}

fn handle_unop(frame: &mut Frame, m: &Machine, index: InstIndex, inst: &Instruction) -> Result<()> {
    let op = inst.decode(index, UnaryOp::from_flags)?;
    let dest = register_operand(frame, index, inst, 0)?;
    let src = operand_to_sign(frame, m, inst.operand(index, 1)?)?;
    let result = match op {
        UnaryOp::Neg => arith::neg(src),
        UnaryOp::Not => arith::not(src),
        UnaryOp::To => src,
    };
    debug!("current operation: {:?} {} = {} --> register {}", op, src, result, dest);
    load_sign(frame, m, index, dest, result)
}

fn handle_binop(frame: &mut Frame, m: &Machine, index: InstIndex, inst: &Instruction) -> Result<()> {
    let op = inst.decode(index, BinaryOp::from_flags)?;
    let dest = register_operand(frame, index, inst, 0)?;
    let a = operand_to_sign(frame, m, inst.operand(index, 1)?)?;
    let b = operand_to_sign(frame, m, inst.operand(index, 2)?)?;

    let divide = |q: arith::Quotient| {
        if q.divides_by_zero {
            warn!("#{}: possible division by zero ({:?} {} by {})", index, op, a, b);
        }
        q.sign
    };
    let result = match op {
        BinaryOp::Add => arith::add(a, b),
        BinaryOp::Sub => arith::sub(a, b),
        BinaryOp::Rsub => arith::sub(b, a),
        BinaryOp::Mul => arith::mul(a, b),
        BinaryOp::Div => divide(arith::div(a, b)),
        BinaryOp::Rem => divide(arith::rem(a, b)),
        BinaryOp::And => arith::bitwise_and(a, b),
        BinaryOp::Or => arith::bitwise_or(a, b),
        BinaryOp::Xor => arith::bitwise_xor(a, b),
        BinaryOp::Shl | BinaryOp::Shr | BinaryOp::Ushr => arith::shift(a, b),
    };
    debug!("current operation: {} {:?} {} = {} --> register {}", a, op, b, result, dest);
    load_sign(frame, m, index, dest, result)
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::class::ClassTable;
    use crate::instruction::IfCond;

    fn classes() -> ClassTable {
        let mut classes = ClassTable::new();
        classes
            .define("a/Base", None, &["id"])
            .define("a/Foo", Some("a/Base"), &["x"]);
        classes
    }

    fn run(m: &Machine, nregs: usize, code: Vec<Instruction>) -> Frame {
        let mut program = Program::new();
        let range = program.push_code(code);
        let block = program.push_block(range, nregs, vec![]).unwrap();
        let input = Frame::new(nregs, m);
        interpret_block(&program, program.block(block).unwrap(), &input, m)
    }

    fn sign_of(frame: &Frame, m: &Machine, reg: usize) -> Sign {
        operand_to_sign(frame, m, &Operand::register(reg as u16)).unwrap()
    }

    #[test]
    fn test_const_and_move() {
        let classes = classes();
        let m = Machine::new(&classes);
        let frame = run(
            &m,
            3,
            vec![
                Instruction::constant(0, Operand::int(5)),
                Instruction::constant(1, Operand::boolean(false)),
                Instruction::mov(Operand::register(2), Operand::register(0)),
                Instruction::constant(1, Operand::string("ignored")),
            ],
        );
        assert_eq!(sign_of(&frame, &m, 0), Sign::POSITIVE);
        assert_eq!(sign_of(&frame, &m, 1), Sign::FALSE);
        assert_eq!(sign_of(&frame, &m, 2), Sign::POSITIVE);
    }

    #[test]
    fn test_result_and_exception_registers() {
        let classes = classes();
        let m = Machine::new(&classes);
        let frame = run(
            &m,
            1,
            vec![
                Instruction::constant(0, Operand::int(-1)),
                Instruction::mov(Operand::result(), Operand::register(0)),
                Instruction::mov(Operand::exception(), Operand::result()),
            ],
        );
        assert_eq!(frame.register(frame.result_register()).unwrap(), frame.register(0).unwrap());
        assert_eq!(frame.register(frame.exception_register()).unwrap(), frame.register(0).unwrap());
    }

    #[test]
    fn test_binop_table() {
        let classes = classes();
        let m = Machine::new(&classes);
        let frame = run(
            &m,
            9,
            vec![
                Instruction::constant(0, Operand::int(5)),
                Instruction::constant(1, Operand::int(-3)),
                Instruction::binop(BinaryOp::Add, 2, Operand::register(0), Operand::register(1)),
                Instruction::binop(BinaryOp::Mul, 3, Operand::register(0), Operand::register(1)),
                Instruction::binop(BinaryOp::Sub, 4, Operand::register(0), Operand::register(1)),
                Instruction::binop(BinaryOp::Rsub, 5, Operand::register(0), Operand::register(1)),
                Instruction::binop(BinaryOp::Shl, 6, Operand::register(0), Operand::int(2)),
                Instruction::binop(BinaryOp::Div, 7, Operand::register(0), Operand::int(0)),
                Instruction::binop(BinaryOp::Rem, 8, Operand::register(1), Operand::register(0)),
            ],
        );
        assert_eq!(sign_of(&frame, &m, 2), Sign::TOP);
        assert_eq!(sign_of(&frame, &m, 3), Sign::NEGATIVE);
        assert_eq!(sign_of(&frame, &m, 4), Sign::POSITIVE);
        assert_eq!(sign_of(&frame, &m, 5), Sign::NEGATIVE);
        assert_eq!(sign_of(&frame, &m, 6), Sign::TOP);
        // Division by exactly zero has no result.
        assert!(m.sets().is_empty(frame.register(7).unwrap()));
        assert_eq!(sign_of(&frame, &m, 8), Sign::NEGATIVE | Sign::ZERO);
    }

    #[test]
    fn test_unop() {
        let classes = classes();
        let m = Machine::new(&classes);
        let frame = run(
            &m,
            4,
            vec![
                Instruction::constant(0, Operand::int(7)),
                Instruction::unop(UnaryOp::Neg, 1, Operand::register(0)),
                Instruction::unop(UnaryOp::Not, 2, Operand::register(0)),
                Instruction::unop(UnaryOp::To, 3, Operand::register(0)),
            ],
        );
        assert_eq!(sign_of(&frame, &m, 1), Sign::NEGATIVE);
        assert_eq!(sign_of(&frame, &m, 2), Sign::NEGATIVE);
        assert_eq!(sign_of(&frame, &m, 3), Sign::POSITIVE);
    }

    #[test]
    fn test_cmp_empty_clears() {
        let classes = classes();
        let m = Machine::new(&classes);
        let frame = run(
            &m,
            3,
            vec![
                Instruction::constant(2, Operand::int(1)),
                // Registers 0 and 1 hold nothing: the difference has no sign.
                Instruction::cmp(2, Operand::register(0), Operand::register(1)),
                Instruction::if_cond(IfCond::Eq, Operand::register(0), Operand::register(1), 0),
            ],
        );
        assert!(m.sets().is_empty(frame.register(2).unwrap()));
    }

    #[test]
    fn test_skip_and_continue() {
        let classes = classes();
        let m = Machine::new(&classes);
        let mut bad_flags = Instruction::binop(BinaryOp::Add, 0, Operand::int(1), Operand::int(1));
        bad_flags.flags = 0x7f;
        let frame = run(
            &m,
            2,
            vec![
                bad_flags,
                Instruction::constant(9, Operand::int(1)),
                Instruction::new_instance(0, "a/Missing"),
                Instruction::new(Opcode::Move, 0, vec![Operand::register(0)]),
                Instruction::array(ArrayOp::Length, vec![]),
                Instruction::invoke("a/Foo", "run", &[0]),
                Instruction::constant(1, Operand::int(-4)),
            ],
        );
        assert!(m.sets().is_empty(frame.register(0).unwrap()));
        assert_eq!(sign_of(&frame, &m, 1), Sign::NEGATIVE);
    }

    #[test]
    fn test_unmodeled_operations_keep_frame() {
        let classes = classes();
        let m = Machine::new(&classes);
        let mut bad_monitor = Instruction::monitor(MonitorOp::Enter, 0);
        bad_monitor.flags = 0x10;
        let frame = run(
            &m,
            2,
            vec![
                Instruction::constant(0, Operand::int(2)).with_line(10),
                Instruction::monitor(MonitorOp::Enter, 0).with_line(11),
                Instruction::check_cast(0, "a/Foo"),
                Instruction::static_field(InstanceOp::StaticGet, 0, "a/Foo", "count", "int"),
                Instruction::static_field(InstanceOp::StaticPut, 0, "a/Foo", "count", "int"),
                Instruction::switch(SwitchOp::Sparse, 0),
                Instruction::switch(SwitchOp::Packed, 0),
                Instruction::monitor(MonitorOp::Exit, 0),
                bad_monitor.with_line(14),
                Instruction::throw(0),
            ],
        );
        assert_eq!(sign_of(&frame, &m, 0), Sign::POSITIVE);
        assert!(m.sets().is_empty(frame.register(1).unwrap()));
        assert!(frame.store().is_empty());
    }

    #[test]
    fn test_wide_operands() {
        let classes = classes();
        let m = Machine::new(&classes);
        let frame = run(
            &m,
            4,
            vec![
                Instruction::constant(0, Operand::double(-2.5)),
                Instruction::mov(Operand::wide_register(2), Operand::wide_register(0)),
                Instruction::constant(1, Operand::double(0.0)),
            ],
        );
        assert_eq!(sign_of(&frame, &m, 0), Sign::NEGATIVE);
        assert_eq!(sign_of(&frame, &m, 2), Sign::NEGATIVE);
        assert_eq!(sign_of(&frame, &m, 1), Sign::ZERO);
        assert_eq!(Operand::double(1.5).to_string(), "1.5D");
    }

    #[test]
    fn test_instance_ops() {
        let classes = classes();
        let m = Machine::new(&classes);
        let frame = run(
            &m,
            5,
            vec![
                Instruction::new_instance(0, "a/Foo"),
                Instruction::constant(1, Operand::int(3)),
                Instruction::iput(1, 0, "a/Foo", "x", "int"),
                Instruction::iput(1, 0, "a/Foo", "id", "int"),
                Instruction::iget(2, 0, "a/Foo", "x", "int"),
                Instruction::instance_of(3, 0, "a/Base"),
                Instruction::instance_of(4, 0, "a/Other"),
            ],
        );
        assert_eq!(sign_of(&frame, &m, 2), Sign::POSITIVE);
        assert_eq!(sign_of(&frame, &m, 3), Sign::TRUE);
        assert_eq!(sign_of(&frame, &m, 4), Sign::FALSE);

        let obj = m.sets().iter(frame.register(0).unwrap()).next().unwrap();
        assert!(!frame.store_object_get(obj, "a/Base", "id").unwrap().is_null());
        // One object cell plus the two field cells.
        assert_eq!(frame.store().len(), 3);
    }

    #[test]
    fn test_instance_of_empty_source_clears() {
        let classes = classes();
        let m = Machine::new(&classes);
        let frame = run(
            &m,
            2,
            vec![
                Instruction::constant(1, Operand::int(7)),
                Instruction::instance_of(1, 0, "a/Foo"),
            ],
        );
        assert!(m.sets().is_empty(frame.register(1).unwrap()));
        assert_eq!(sign_of(&frame, &m, 1), Sign::EMPTY);
    }

    #[test]
    fn test_iget_into_source_register() {
        let classes = classes();
        let m = Machine::new(&classes);
        let frame = run(
            &m,
            2,
            vec![
                Instruction::new_instance(0, "a/Foo"),
                Instruction::constant(1, Operand::int(-3)),
                Instruction::iput(1, 0, "a/Foo", "x", "int"),
                Instruction::iget(0, 0, "a/Foo", "x", "int"),
            ],
        );
        assert_eq!(sign_of(&frame, &m, 0), Sign::NEGATIVE);
    }

    #[test]
    fn test_input_frame_untouched() {
        let classes = classes();
        let m = Machine::new(&classes);
        let mut program = Program::new();
        let range = program.push_code([Instruction::new_instance(0, "a/Foo")]);
        let block = program.push_block(range, 1, vec![]).unwrap();
        let input = Frame::new(1, &m);
        let output = interpret_block(&program, program.block(block).unwrap(), &input, &m);
        assert!(input.store().is_empty());
        assert_eq!(output.store().len(), 1);
    }
}
