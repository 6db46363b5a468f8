use qizhen_flow::{Graph, GraphBuilder, Task};
use std::sync::Arc;

use crate::intent::IntentParser;
use crate::llm::LlmInvoker;
use crate::retrieval::Retriever;
use crate::subjects::{Persona, SubjectProfile};
use crate::tasks::types::keys;
use crate::tasks::*;

pub fn build_question_workflow(
    subject: &'static SubjectProfile,
    parser: IntentParser,
    llm: LlmInvoker,
    retriever: Retriever,
) -> Graph {
    let parse_task = Arc::new(ParseQuestionRequestTask::new(subject, parser));
    let parse_id = parse_task.id().to_string();

    let reveal_task = Arc::new(RevealAnswersTask);
    let reveal_id = reveal_task.id().to_string();

    let retrieve_task = Arc::new(RetrieveQuestionContextTask::new(subject, retriever));
    let retrieve_id = retrieve_task.id().to_string();

    let generate_task = Arc::new(GenerateQuestionsTask::new(subject, llm));
    let generate_id = generate_task.id().to_string();

    GraphBuilder::new(format!("{}_questions", subject.slug))
        .add_task(parse_task)
        .add_task(reveal_task)
        .add_task(retrieve_task)
        .add_task(generate_task)
        .add_conditional_edge(
            &parse_id,
            |ctx| ctx.get_sync::<bool>(keys::REVEAL_REQUESTED).unwrap_or(false),
            &reveal_id,
            &retrieve_id,
        )
        .add_edge(&retrieve_id, &generate_id)
        .build()
}

pub fn build_answer_workflow(
    subject: &'static SubjectProfile,
    llm: LlmInvoker,
    retriever: Retriever,
) -> Graph {
    let retrieve_task = Arc::new(RetrieveAnswerContextTask::new(subject, retriever));
    let retrieve_id = retrieve_task.id().to_string();

    let answer_task = Arc::new(GenerateAnswerTask::new(subject, llm));
    let answer_id = answer_task.id().to_string();

    GraphBuilder::new(format!("{}_answer", subject.slug))
        .add_task(retrieve_task)
        .add_task(answer_task)
        .add_edge(&retrieve_id, &answer_id)
        .build()
}

pub fn build_knowledge_graph_workflow(
    subject: &'static SubjectProfile,
    llm: LlmInvoker,
    retriever: Retriever,
) -> Graph {
    let topic_task = Arc::new(ExtractGraphTopicTask);
    let topic_id = topic_task.id().to_string();

    let retrieve_task = Arc::new(RetrieveGraphContextTask::new(subject, retriever));
    let retrieve_id = retrieve_task.id().to_string();

    let mindmap_task = Arc::new(GenerateMindmapTask::new(subject, llm));
    let mindmap_id = mindmap_task.id().to_string();

    GraphBuilder::new(format!("{}_knowledge_graph", subject.slug))
        .add_task(topic_task)
        .add_task(retrieve_task)
        .add_task(mindmap_task)
        .add_edge(&topic_id, &retrieve_id)
        .add_edge(&retrieve_id, &mindmap_id)
        .build()
}

pub fn build_dialogue_workflow(
    subject: &'static SubjectProfile,
    persona: Persona,
    llm: LlmInvoker,
    retriever: Retriever,
) -> Graph {
    let intent_task = Arc::new(ResolveDialogueIntentTask::new(subject, persona, llm.clone()));
    let intent_id = intent_task.id().to_string();

    let retrieve_task = Arc::new(RetrieveDialogueContextTask::new(subject, retriever));
    let retrieve_id = retrieve_task.id().to_string();

    let reply_task = Arc::new(SocraticReplyTask::new(subject, llm));
    let reply_id = reply_task.id().to_string();

    GraphBuilder::new(format!("{}_dialogue", subject.slug))
        .add_task(intent_task)
        .add_task(retrieve_task)
        .add_task(reply_task)
        .add_edge(&intent_id, &retrieve_id)
        .add_edge(&retrieve_id, &reply_id)
        .build()
}
