use arrayvec::ArrayVec;

use crate::{Board, Command, CommandError, CommandFamily, CommandId, LevelingMode, Machine, MachineConfig};

/// Whether the dispatcher sends the generic `ok` after a handler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ack {
    Send,
    /// The handler already answered, e.g. `M105` or a resend request.
    Suppress,
}

pub type Handler<B> = fn(&mut Machine<B>, &mut Command<'_>) -> Result<Ack, CommandError>;

const MAX_HANDLERS: usize = 64;

/// Command id to handler lookup, built once from the machine configuration.
pub struct HandlerTable<B: Board> {
    entries: ArrayVec<(CommandId, Handler<B>), MAX_HANDLERS>,
    tool_change: Handler<B>,
}

impl<B: Board> HandlerTable<B> {
    pub fn new(config: &MachineConfig) -> Self {
        let mut table = Self { entries: ArrayVec::new(), tool_change: Machine::gcode_t };

        table.register(CommandId::g(0), Machine::gcode_g0_g1);
        table.register(CommandId::g(1), Machine::gcode_g0_g1);
        table.register(CommandId::g(4), Machine::gcode_g4);
        table.register(CommandId::g(20), Machine::gcode_g20);
        table.register(CommandId::g(21), Machine::gcode_g21);
        table.register(CommandId::g(28), Machine::gcode_g28);
        table.register(CommandId::g(90), Machine::gcode_g90);
        table.register(CommandId::g(91), Machine::gcode_g91);
        table.register(CommandId::g(92), Machine::gcode_g92);

        table.register(CommandId::m(0), Machine::gcode_m0_m1);
        table.register(CommandId::m(1), Machine::gcode_m0_m1);
        table.register(CommandId::m(42), Machine::gcode_m42);
        table.register(CommandId::m(82), Machine::gcode_m82);
        table.register(CommandId::m(83), Machine::gcode_m83);
        table.register(CommandId::m(92), Machine::gcode_m92);
        table.register(CommandId::m(104), Machine::gcode_m104);
        table.register(CommandId::m(105), Machine::gcode_m105);
        table.register(CommandId::m(108), Machine::gcode_m108);
        table.register(CommandId::m(109), Machine::gcode_m109);
        table.register(CommandId::m(110), Machine::gcode_m110);
        table.register(CommandId::m(111), Machine::gcode_m111);
        table.register(CommandId::m(112), Machine::gcode_m112);
        table.register(CommandId::m(113), Machine::gcode_m113);
        table.register(CommandId::m(114), Machine::gcode_m114);
        table.register(CommandId::m(115), Machine::gcode_m115);
        table.register(CommandId::m(117), Machine::gcode_m117);
        table.register(CommandId::m(119), Machine::gcode_m119);
        table.register(CommandId::m(120), Machine::gcode_m120);
        table.register(CommandId::m(121), Machine::gcode_m121);
        table.register(CommandId::m(140), Machine::gcode_m140);
        table.register(CommandId::m(149), Machine::gcode_m149);
        table.register(CommandId::m(190), Machine::gcode_m190);
        table.register(CommandId::m(200), Machine::gcode_m200);
        table.register(CommandId::m(206), Machine::gcode_m206);
        table.register(CommandId::m(220), Machine::gcode_m220);
        table.register(CommandId::m(226), Machine::gcode_m226);
        table.register(CommandId::m(400), Machine::gcode_m400);
        table.register(CommandId::m(410), Machine::gcode_m410);
        table.register(CommandId::m(500), Machine::gcode_m500);
        table.register(CommandId::m(501), Machine::gcode_m501);
        table.register(CommandId::m(502), Machine::gcode_m502);
        table.register(CommandId::m(503), Machine::gcode_m503);
        table.register(CommandId::m(999), Machine::gcode_m999);

        match config.leveling {
            LevelingMode::Mesh => {
                table.register(CommandId::g(29), Machine::gcode_g29_mesh);
                table.register(CommandId::m(420), Machine::gcode_m420);
                table.register(CommandId::m(421), Machine::gcode_m421);
            }
            LevelingMode::AutoGrid | LevelingMode::AutoThreePoint => {
                table.register(CommandId::g(29), Machine::gcode_g29_auto);
                table.register(CommandId::g(30), Machine::gcode_g30);
                table.register(CommandId::m(401), Machine::gcode_m401);
                table.register(CommandId::m(402), Machine::gcode_m402);
                table.register(CommandId::m(851), Machine::gcode_m851);
            }
        }

        table.entries.sort_unstable_by_key(|(id, _)| *id);
        table
    }

    fn register(&mut self, id: CommandId, handler: Handler<B>) {
        if self.entries.try_push((id, handler)).is_err() {
            log::error!("handler table full, {} not registered", id);
        }
    }

    /// Any `T` code resolves to the tool change handler.
    pub fn resolve(&self, id: CommandId) -> Option<Handler<B>> {
        if id.family == CommandFamily::T {
            return Some(self.tool_change);
        }
        self.entries
            .binary_search_by_key(&id, |(id, _)| *id)
            .ok()
            .map(|i| self.entries[i].1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
