//! Built-in course profiles.

/// Historical figure a dialogue agent imitates, and the topic it opens with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Persona {
    pub character: &'static str,
    pub topic: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectProfile {
    pub slug: &'static str,
    /// Full course name used in prompts
    pub name: &'static str,
    /// Short name shown on the portal
    pub title: &'static str,
    pub description: &'static str,
    pub default_topic: &'static str,
    pub known_topics: &'static [&'static str],
    /// Directory name of the vector index under the index root
    pub index_dir: &'static str,
    /// Themes the vision prompt steers towards
    pub focus_areas: &'static [&'static str],
    pub persona: Option<Persona>,
}

const SUBJECTS: &[SubjectProfile] = &[
    SubjectProfile {
        slug: "mayuan",
        name: "马克思主义基本原理",
        title: "马原助手",
        description: "马克思主义基本原理智能学习与问答",
        default_topic: "马克思主义基本原理",
        known_topics: &[
            "唯物辩证法",
            "对立统一规律",
            "质量互变规律",
            "否定之否定规律",
            "历史唯物主义",
            "认识论",
            "实践与认识",
            "剩余价值",
            "商品二因素",
            "劳动二重性",
            "社会基本矛盾",
            "科学社会主义",
        ],
        index_dir: "database_agent_mayuan",
        focus_areas: &[
            "唯物辩证法（对立统一、质量互变、否定之否定）",
            "历史唯物主义",
            "马克思主义认识论",
            "马克思主义政治经济学基本原理",
            "科学社会主义基本原理",
        ],
        persona: None,
    },
    SubjectProfile {
        slug: "jindaishi",
        name: "中国近现代史纲要",
        title: "史纲助手",
        description: "中国近现代史纲要智能学习与问答",
        default_topic: "中国近现代史纲要",
        known_topics: &[
            "鸦片战争",
            "太平天国运动",
            "洋务运动",
            "戊戌变法",
            "八国联军侵华",
            "辛亥革命",
            "新文化运动",
            "五四运动",
            "国共合作",
            "北伐战争",
            "井冈山根据地",
            "长征",
            "遵义会议",
            "抗日战争",
            "解放战争",
            "新民主主义革命",
            "三大改造",
            "土地改革",
            "中华人民共和国成立",
            "抗美援朝",
            "改革开放",
            "社会主义初级阶段",
            "一国两制",
        ],
        index_dir: "database_agent_jindaishi",
        focus_areas: &[
            "近代中国的民族危机与救亡图存",
            "新民主主义革命的历程",
            "社会主义革命和建设",
            "改革开放与中国特色社会主义",
        ],
        persona: None,
    },
    SubjectProfile {
        slug: "sdfz",
        name: "思想道德与法治",
        title: "思修法治助手",
        description: "思想道德与法治智能学习与问答",
        default_topic: "思想道德与法治",
        known_topics: &[
            "人生观",
            "理想信念",
            "中国精神",
            "爱国主义",
            "社会主义核心价值观",
            "道德修养",
            "社会公德",
            "职业道德",
            "家庭美德",
            "法治思维",
            "宪法",
            "全面依法治国",
        ],
        index_dir: "database_agent_sixiangdaodefazhi",
        focus_areas: &[
            "人生观与理想信念",
            "中国精神与社会主义核心价值观",
            "道德规范与道德实践",
            "社会主义法治体系与法治思维",
        ],
        persona: None,
    },
    SubjectProfile {
        slug: "maogai",
        name: "毛泽东思想和中国特色社会主义理论体系概论",
        title: "毛概助手",
        description: "毛泽东思想概论智能学习与问答",
        default_topic: "毛泽东思想",
        known_topics: &[
            "毛泽东思想",
            "实事求是",
            "群众路线",
            "独立自主",
            "新民主主义革命理论",
            "社会主义改造理论",
            "邓小平理论",
            "三个代表",
            "科学发展观",
            "统一战线",
        ],
        index_dir: "database_agent_maogai",
        focus_areas: &[
            "毛泽东思想的形成与活的灵魂",
            "新民主主义革命理论",
            "社会主义改造理论",
            "中国特色社会主义理论体系",
        ],
        persona: Some(Persona {
            character: "毛泽东",
            topic: "毛泽东思想",
        }),
    },
    SubjectProfile {
        slug: "xigai",
        name: "习近平新时代中国特色社会主义思想概论",
        title: "习概助手",
        description: "习近平新时代中国特色社会主义思想概论智能学习与问答",
        default_topic: "新时代中国特色社会主义思想",
        known_topics: &[
            "新时代中国特色社会主义思想",
            "两个确立",
            "两个维护",
            "五位一体总体布局",
            "四个全面战略布局",
            "新发展理念",
            "全面深化改革",
            "全面依法治国",
            "全面从严治党",
            "共同富裕",
        ],
        index_dir: "database_agent_xigai",
        focus_areas: &[
            "新时代坚持和发展中国特色社会主义",
            "五位一体总体布局与四个全面战略布局",
            "新发展理念与高质量发展",
            "全面从严治党",
        ],
        persona: Some(Persona {
            character: "马克思",
            topic: "马克思主义哲学",
        }),
    },
];

impl SubjectProfile {
    pub fn builtin() -> &'static [SubjectProfile] {
        SUBJECTS
    }

    pub fn by_slug(slug: &str) -> Option<&'static SubjectProfile> {
        SUBJECTS.iter().find(|s| s.slug == slug)
    }

    pub fn has_dialogue(&self) -> bool {
        self.persona.is_some()
    }
}
