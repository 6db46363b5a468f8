//! Prompt templates for every agent.

use crate::models::{Difficulty, ParsedIntent, QuestionKind, QuestionType};
use crate::subjects::SubjectProfile;

const HARD_ADDENDUM: &str = "**困难题目额外要求：**
- 题干应包含复杂情境或案例，需要学生综合运用原理进行深度分析与评价。
- 对相关概念、范畴或理论命题进行比较、辨析或批判，突出辩证思维。
- 选择题：干扰项需具备高度迷惑性，与正确答案存在关键差异但概念接近。
- 判断题：可设置常见谬误或易混淆表述，引导学生进行严谨辨析。
- 简答/材料分析题：要求多角度论证，联系现实并提出评价与思考。
- 解析部分需展示推理链条或思考步骤，而不仅给出结论。";

struct KindTemplate {
    display_name: &'static str,
    format_requirements: &'static str,
    output_example: &'static str,
}

fn kind_template(kind: QuestionKind) -> KindTemplate {
    match kind {
        QuestionKind::Choice => KindTemplate {
            display_name: "选择题",
            format_requirements: "每道选择题包含：题干、4个选项（A、B、C、D）、正确答案和简要解析。
4. 选项设计要合理，干扰项要有一定迷惑性。
5. 为便于后续按需展示，请确保每个要素各自独立成行，并以如下关键词开头：‘题干：’、‘A.’、‘B.’、‘C.’、‘D.’、‘正确答案：’、‘解析：’。",
            output_example: "题目1：
题干：[具体题目内容]
A. [选项A]
B. [选项B]
C. [选项C]
D. [选项D]
正确答案：[正确选项]
解析：[简要解析说明]

题目2：
...",
        },
        QuestionKind::TrueFalse => KindTemplate {
            display_name: "判断题",
            format_requirements: "判断题格式：题干 + 正确答案（正确/错误）+ 简要解析。
为便于后续按需展示，请确保每个要素各自独立成行，并以如下关键词开头：‘题干：’、‘正确答案：’、‘解析：’。",
            output_example: "题目1：
题干：[具体题目内容]
正确答案：[正确/错误]
解析：[简要解析说明]

题目2：
...",
        },
        QuestionKind::ShortAnswer => KindTemplate {
            display_name: "材料分析/简答题",
            format_requirements: "每道材料分析/简答题包含：题干（可提供材料或问题描述）、参考答案、简要解析。
为便于后续按需展示，请确保每个要素各自独立成行，并以如下关键词开头：‘题干：’、‘参考答案：’、‘解析：’。",
            output_example: "题目1：
题干：[具体题目内容]
参考答案：[答案内容]
解析：[简要解析说明]

题目2：
...",
        },
    }
}

pub fn question_system(subject: &SubjectProfile) -> String {
    format!("你是一位专业的{}课程教师，擅长出题和教学。", subject.name)
}

/// Render the question-generation prompt for a parsed request.
pub fn question_prompt(
    subject: &SubjectProfile,
    intent: &ParsedIntent,
    context: &str,
    user_input: &str,
) -> String {
    let mut prompt = match intent.question_type {
        QuestionType::Mixed => mixed_type_prompt(subject, intent, context, user_input),
        QuestionType::Single(kind) => single_type_prompt(subject, kind, intent, context, user_input),
    };
    if intent.difficulty == Difficulty::Hard {
        prompt.push_str("\n\n");
        prompt.push_str(HARD_ADDENDUM);
    }
    prompt
}

fn single_type_prompt(
    subject: &SubjectProfile,
    kind: QuestionKind,
    intent: &ParsedIntent,
    context: &str,
    user_input: &str,
) -> String {
    let template = kind_template(kind);
    let difficulty = intent.difficulty.label();
    format!(
        "你是一位资深的{subject}课程教师，具有丰富的出题经验。请根据以下要求生成高质量的题目。

**任务要求：**
- 主题：{topic}
- 题目数量：{num}道
- 难度等级：{difficulty}
- 题目类型：{kind_name}

**参考资料：**
{context}

**出题要求：**
1. 题目必须严格基于提供的参考资料内容。
2. {difficulty}难度的题目特点：
   - 简单：考查基本概念和定义的理解。
   - 中等：考查概念间的关系和应用。
   - 困难：考查深层理解、分析和综合运用能力。
3. {requirements}
4. 语言表达要准确、严谨。

**原始用户需求：**
{user_input}

**输出格式：**
{example}

请严格按照上述需求生成题目。",
        subject = subject.name,
        topic = intent.topic_line(),
        num = intent.num_questions,
        kind_name = template.display_name,
        requirements = template.format_requirements,
        example = template.output_example,
    )
}

fn mixed_type_prompt(
    subject: &SubjectProfile,
    intent: &ParsedIntent,
    context: &str,
    user_input: &str,
) -> String {
    let type_details = intent
        .type_counts
        .iter()
        .map(|(kind, n)| format!("- {}：{}道", kind.label(), n))
        .collect::<Vec<_>>()
        .join("\n");
    let difficulty = intent.difficulty.label();
    format!(
        "你是一位资深的{subject}课程教师，具有丰富的出题经验。请根据以下要求生成高质量的题目。

**任务要求：**
- 主题：{topic}
- 题目类型及数量：
{type_details}
- 难度等级：{difficulty}

**参考资料：**
{context}

**出题要求：**
1. 题目必须严格基于提供的参考资料内容。
2. {difficulty}难度的题目特点：
   - 简单：考查基本概念和定义的理解。
   - 中等：考查概念间的关系和应用。
   - 困难：考查深层理解、分析和综合运用能力。
3. 各题型格式要求：
   - 选择题：题干 + 4个选项（A、B、C、D）+ 正确答案 + 简要解析。
   - 判断题：题干 + 正确答案（正确/错误）+ 简要解析。
   - 材料分析/简答题：题干（可含材料）+ 参考答案 + 简要解析。
   为便于系统在首次展示时隐藏答案与解析，请确保各要素各自独立成行，并以如下关键词开头：
   ‘题干：’、‘A.’、‘B.’、‘C.’、‘D.’、‘正确答案：’、‘参考答案：’、‘解析：’。
4. 语言表达要准确、严谨。

**原始用户需求：**
{user_input}

**输出格式示例：**
选择题1：
题干：[具体题目内容]
A. [选项A]
B. [选项B]
C. [选项C]
D. [选项D]
正确答案：[正确选项]
解析：[简要解析说明]

判断题1：
题干：[具体题目内容]
正确答案：[正确/错误]
解析：[简要解析说明]

简答题1：
题干：[具体题目内容]
参考答案：[答案内容]
解析：[简要解析说明]

请按照题型分类并保持题号连续。",
        subject = subject.name,
        topic = intent.topic_line(),
    )
}

pub fn answer_system(subject: &SubjectProfile) -> String {
    format!(
        "你是一位严谨的{}解答专家。请使用结构化 Markdown（标题、列表、加粗）输出，层次清晰，美观易读；在保证准确性的前提下适度展开，覆盖关键要点。",
        subject.name
    )
}

pub fn answer_prompt(subject: &SubjectProfile, question: &str, context: &str) -> String {
    format!(
        "你是一位精通{subject}的教师，请以结构化 Markdown 输出，条理清晰、重点明确。请优先完整与准确，适度展开，避免冗余。若下方\"参考资料\"足够，请严格基于资料作答；否则结合你的专业知识回答。

请按照以下结构组织你的回答（如不适用可省略某些小节）：
### 核心结论
- 用1-2句加粗给出直接答案或观点。

### 关键要点
- 3-6条要点，每条不超过两句，必要处使用**加粗关键词**。

### 依据与推理
- 用2-5句解释你的论证链条，可引用资料中的关键句（简洁转述）。

### 示例或应用（可选）
- 给出1个贴近教学的例子或场景来帮助理解。

### 小结与延伸（可选）
- 用1-2句总结，并提出1个进一步思考方向。

参考资料（可能为空）：
{context}

学生问题：{question}
回答：",
        subject = subject.name,
    )
}

pub const KNOWLEDGE_GRAPH_SYSTEM: &str = "你是一位精通知识图谱构建的学者。";

pub fn knowledge_graph_prompt(subject: &SubjectProfile, topic: &str, context: &str) -> String {
    format!(
        "你是一位{subject}知识图谱专家。请利用提供的\"参考资料\"，围绕知识点\"{topic}\"构建一个 Mermaid mindmap（思维导图）格式的知识图谱，突出关键概念及其主要关系，并保持简洁易读。

输出要求：
1. mindmap 总节点不超过 15 个，层级不超过 3 级，保证图谱信息清晰、结构美观，便于学生学习和整理思路。
2. 先输出 Mermaid 源代码，必须使用如下代码块格式：
```mermaid
mindmap
  root(({topic}))
    概念1
      子概念A
    概念2
```
3. Mermaid 代码块结束后，换行再输出一段不超过 100 字的中文总结，对图谱内容进行简洁概括。
4. 除以上内容外，不要输出其他文字。

参考资料：
{context}",
        subject = subject.name,
    )
}

pub const INTENT_SYSTEM: &str = "你是一个意图识别专家。";

pub fn dialogue_intent_prompt(
    subject: &SubjectProfile,
    user_input: &str,
    default_character: &str,
    default_topic: &str,
) -> String {
    format!(
        "用户希望进行一场关于{subject}的苏格拉底式对话，并希望我模仿特定人物的语气。
请从用户的输入中识别出“对话主题”和“希望模仿的历史人物”。
如果未明确指定人物，请默认“{default_character}”。如果未明确指定主题，请默认“{default_topic}”。

请以 JSON 格式输出，例如：
{{
    \"topic\": \"实践与认识的关系\",
    \"character\": \"马克思\"
}}

用户输入: {user_input}",
        subject = subject.name,
    )
}

pub fn socratic_system(
    subject: &SubjectProfile,
    character: &str,
    topic: &str,
    snippets: &[String],
) -> String {
    format!(
        "你是一个资深的{subject}教师，现在你正在扮演 {character}，与学生进行一场关于 {topic} 的苏格拉底式对话。
你的目标是：
1. 模仿 {character} 的说话语气、风格和常用词汇。
2. 保持苏格拉底式对话的核心：不直接给出答案，而是通过一系列启发性的问题引导学生思考。
3. 问题应基于当前对话内容和参考资料，聚焦并促进思考。
4. 如果学生回答偏离主题，尝试巧妙引导回主题。
5. 当你认为学生对某个概念已经有了足够深入的思考时，可适当总结或提出更高层次的问题。
6. 使用简洁的分点与小标题组织语言，突出层次与逻辑，必要处使用**加粗**强调关键词。

参考资料：
{references}

当前对话历史：
",
        subject = subject.name,
        references = snippets.join("   "),
    )
}

/// System prompt for image questions in a subject.
pub fn multimodal_system(subject: &SubjectProfile) -> String {
    let name = subject.name;
    let focus = subject
        .focus_areas
        .iter()
        .map(|area| format!("- {area}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "你是一个专业的{name}AI助手。你能够理解和分析用户提供的文本和图片内容。

请遵循以下原则：
1. 如果用户提供了图片，请仔细分析图片内容，特别关注与{name}相关的内容
2. 结合图片信息和用户问题，从{name}的角度进行分析和回答
3. 如果图片中包含理论概念、图表、历史人物或事件等，请结合专业知识进行解读
4. 可以分析图片中的文字、图表、概念图等，并用相关理论进行阐释
5. 保持回答的理论性、准确性和教育性
6. 如果图片内容与{name}无关，也请客观分析，但尽量引导到相关理论思考
7. 如果图片与当前主题无关，请礼貌地建议用户上传相关图片或重定向讨论

涉及的主要内容包括：
{focus}

请用中文回答用户的问题，确保回答专业、准确、有教育意义。"
    )
}

/// System prompt for image turns of a persona dialogue.
pub fn persona_multimodal_system(character: &str, topic: &str) -> String {
    format!(
        "你现在要扮演{character}，与用户进行苏格拉底式对话，探讨\"{topic}\"这个主题。

如果用户提供了图片，请：
1. 仔细分析图片内容，包括文字、图表、人物等
2. 以{character}的身份和观点来理解和解读图片
3. 结合图片内容，用苏格拉底式的方法引导用户思考
4. 如果图片与讨论主题相关，深入分析其理论意义
5. 如果图片与主题无关，请礼貌地重定向到当前话题

苏格拉底式对话的特点：
- 通过提问引导用户思考，而不是直接给出答案
- 挖掘用户观点中的假设和逻辑问题
- 循序渐进地引导用户发现真理
- 保持{character}的语言风格和理论背景

请用中文进行对话，体现{character}的思想特色和对话风格。"
    )
}
