use qizhen_flow::{Context, Graph, SerializableMessage};
use tracing::{error, info, warn};

use super::{AgentRequest, SubjectServices};
use crate::error::{DialogueError, LlmError};
use crate::llm::{ChatMessage, ChatOptions};
use crate::models::{DialogueReply, DialogueState};
use crate::prompts;
use crate::subjects::Persona;
use crate::tasks::types::{DIALOGUE_TEMPERATURE, keys};
use crate::upload::StagedImage;
use crate::workflow::build_dialogue_workflow;

/// Reply plus the dialogue state to store for the next turn.
#[derive(Debug, Clone)]
pub struct DialogueTurn {
    pub reply: DialogueReply,
    pub state: DialogueState,
}

/// Socratic dialogue in the voice of the subject's historical figure.
pub struct DialogueAgent {
    services: SubjectServices,
    persona: Persona,
    graph: Graph,
}

impl DialogueAgent {
    /// `None` when the subject has no persona.
    pub fn new(services: SubjectServices) -> Option<Self> {
        let persona = services.subject.persona?;
        let graph = build_dialogue_workflow(
            services.subject,
            persona,
            services.llm.clone(),
            services.retriever.clone(),
        );
        Some(Self {
            services,
            persona,
            graph,
        })
    }

    pub fn persona(&self) -> Persona {
        self.persona
    }

    /// Run one turn. `state` is `None` on the first turn. History only grows
    /// when a reply was produced.
    pub async fn respond(
        &self,
        request: AgentRequest<'_>,
        state: Option<DialogueState>,
    ) -> Result<DialogueTurn, DialogueError> {
        if let Some(image) = request.image {
            match self.from_image(request, image, state.as_ref()).await {
                Ok(reply) => return Ok(self.advance(request.text, reply, state)),
                Err(e) => {
                    warn!(subject = self.services.subject.slug, "image dialogue turn failed, using text pipeline: {}", e);
                }
            }
        }
        self.from_text(request, state).await
    }

    async fn from_image(
        &self,
        request: AgentRequest<'_>,
        image: &StagedImage,
        state: Option<&DialogueState>,
    ) -> Result<String, LlmError> {
        let (character, topic) = match state {
            Some(state) => (state.persona_character.as_str(), state.topic.as_str()),
            None => (self.persona.character, self.persona.topic),
        };
        let messages = vec![
            ChatMessage::system(prompts::persona_multimodal_system(character, topic)),
            ChatMessage::user(request.text),
        ];
        self.services
            .llm
            .vision(
                messages,
                image.bytes(),
                ChatOptions::new(DIALOGUE_TEMPERATURE, &request.params),
            )
            .await
    }

    fn advance(&self, user_input: &str, reply: String, state: Option<DialogueState>) -> DialogueTurn {
        let mut state = state.unwrap_or_else(|| DialogueState {
            topic: self.persona.topic.to_string(),
            persona_character: self.persona.character.to_string(),
            turn_count: 0,
            history: Vec::new(),
        });
        state.turn_count += 1;
        state.history.push(SerializableMessage::user(user_input));
        state.history.push(SerializableMessage::assistant(reply.clone()));
        turn(reply, state)
    }

    async fn from_text(
        &self,
        request: AgentRequest<'_>,
        state: Option<DialogueState>,
    ) -> Result<DialogueTurn, DialogueError> {
        let previous_turns = state.as_ref().map_or(0, |s| s.turn_count);
        let context = Context::new();
        context.set(keys::USER_INPUT, request.text).await;
        context.set(keys::GENERATION_PARAMS, request.params).await;
        if let Some(state) = &state {
            context.set(keys::DIALOGUE_STATE, state).await;
        }

        let result = self.graph.execute(context.clone()).await.map_err(|e| {
            error!(subject = self.services.subject.slug, "dialogue workflow failed: {}", e);
            DialogueError::Generation(e.to_string())
        })?;
        let reply = result
            .response
            .ok_or_else(|| DialogueError::Generation("dialogue workflow produced no reply".into()))?;

        let topic: String = context
            .get(keys::DIALOGUE_TOPIC)
            .await
            .unwrap_or_else(|| self.persona.topic.to_string());
        let character: String = context
            .get(keys::DIALOGUE_CHARACTER)
            .await
            .unwrap_or_else(|| self.persona.character.to_string());
        let state = DialogueState {
            topic,
            persona_character: character,
            turn_count: previous_turns + 1,
            history: context.get_all_messages().await,
        };
        info!(
            subject = self.services.subject.slug,
            turn = state.turn_count,
            character = %state.persona_character,
            "dialogue turn completed"
        );
        Ok(turn(reply, state))
    }
}

fn turn(reply: String, state: DialogueState) -> DialogueTurn {
    DialogueTurn {
        reply: DialogueReply {
            response: reply,
            character: state.persona_character.clone(),
            topic: state.topic.clone(),
            turn_count: state.turn_count,
        },
        state,
    }
}
