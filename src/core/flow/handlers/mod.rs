pub mod change_status;
pub mod condition;
pub mod create_task;
pub mod delay;
pub mod noop;
pub mod stubs;
pub mod write_note;

use crate::core::config::EngineConfig;
use crate::core::flow::clinic::ClinicServices;
use crate::core::flow::dispatcher::HandlerRegistryBuilder;
use crate::core::flow::template::NodeKind;

/// Register every built-in node handler into the supplied builder.
pub fn register_builtins(
    builder: &mut HandlerRegistryBuilder,
    services: ClinicServices,
    engine: &EngineConfig,
) {
    builder
        .register(write_note::WriteNoteHandler::new(
            services.clone(),
            engine.note_timestamp_format.clone(),
        ))
        .register(change_status::ChangeStatusHandler::new(services.clone()))
        .register(create_task::CreateTaskHandler::new(
            services,
            engine.member_batch_limit,
        ))
        .register(stubs::StubActionHandler::new(NodeKind::SendWhatsapp))
        .register(stubs::StubActionHandler::new(NodeKind::SendEmail))
        .register(stubs::StubActionHandler::new(NodeKind::ApiCall))
        .register(delay::FixedDelayHandler::new())
        .register(delay::WaitUntilHandler::new())
        .register(delay::WaitResponseHandler::new())
        .register(condition::FieldCheckHandler::new())
        .register(condition::ResponseCheckHandler::new());
}
