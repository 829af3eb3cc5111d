//! Over-the-counter suggestion fallback.
//!
//! Used only when the classifier returned no structured suggestions. Pure and
//! deterministic: the same advice and symptoms always give the same list.

use regex::Regex;
use std::sync::LazyLock;

use crate::models::Assessment;

/// Remedy and ingredient terms recognised in free-text advice, in priority order.
const VOCABULARY: &[&str] = &[
    "paracetamol",
    "acetaminophen",
    "ibuprofen",
    "naproxen",
    "naproxen sodium",
    "antihistamine",
    "loratadine",
    "cetirizine",
    "diphenhydramine",
    "chlorpheniramine",
    "decongestant",
    "pseudoephedrine",
    "phenylephrine",
    "oxymetazoline",
    "dextromethorphan",
    "guaifenesin",
    "saline",
    "honey",
    "lozenge",
    "menthol",
    "hydrocortisone",
    "bacitracin",
    "neomycin",
    "calamine",
    "loperamide",
    "bismuth",
    "antacid",
    "oral rehydration",
    "nausea",
    "vomit",
    "vomiting",
    "dimenhydrinate",
    "meclizine",
    "senna",
    "polyethylene glycol",
    "docusate",
    "bisacodyl",
    "laxative",
];

const DEFAULT_SUGGESTIONS: &[&str] = &[
    "paracetamol (acetaminophen)",
    "ibuprofen (if no contraindication)",
    "saline nasal spray",
    "lozenges or throat soothing options",
];

static FEVER_OR_PAIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(fever|headache|pain|ache|muscle)\b").expect("static pattern compiles")
});

enum Trigger {
    /// Any of the fragments appears anywhere in the text.
    Contains(&'static [&'static str]),
    /// Whole-word match.
    Pattern(&'static LazyLock<Regex>),
}

impl Trigger {
    fn matches(&self, text: &str) -> bool {
        match self {
            Self::Contains(fragments) => fragments.iter().any(|f| text.contains(f)),
            Self::Pattern(re) => re.is_match(text),
        }
    }
}

struct SymptomCategory {
    trigger: Trigger,
    suggestions: &'static [&'static str],
}

/// Declaration order is output order.
static CATEGORIES: &[SymptomCategory] = &[
    // fever / pain
    SymptomCategory {
        trigger: Trigger::Pattern(&FEVER_OR_PAIN),
        suggestions: &[
            "paracetamol (acetaminophen)",
            "ibuprofen (if no contraindication)",
            "naproxen sodium (if appropriate)",
        ],
    },
    // cough
    SymptomCategory {
        trigger: Trigger::Contains(&["cough"]),
        suggestions: &[
            "dextromethorphan (cough suppressant - for dry cough)",
            "guaifenesin (expectorant - for productive cough)",
            "honey or throat lozenges (children >1y for cough relief)",
        ],
    },
    // nasal congestion
    SymptomCategory {
        trigger: Trigger::Contains(&["congest", "runny", "sneeze", "nasal"]),
        suggestions: &[
            "saline nasal spray",
            "oxymetazoline nasal spray (short-term use)",
            "oral decongestant (pseudoephedrine or phenylephrine) — check interactions",
        ],
    },
    // allergy / itch
    SymptomCategory {
        trigger: Trigger::Contains(&["allerg", "itch", "hayfever", "sneez"]),
        suggestions: &[
            "loratadine or cetirizine (non-drowsy antihistamines)",
            "diphenhydramine (sedating antihistamine - avoid if you must stay alert)",
        ],
    },
    // skin
    SymptomCategory {
        trigger: Trigger::Contains(&["rash", "hives", "skin", "wound"]),
        suggestions: &[
            "topical hydrocortisone 1% cream for mild inflammation",
            "antiseptic/antibiotic ointment (e.g., bacitracin/neosporin) for minor wounds",
            "calamine lotion for itch or mild rash",
        ],
    },
    // diarrhea
    SymptomCategory {
        trigger: Trigger::Contains(&["diarrh", "diarrhoea", "loose stool"]),
        suggestions: &[
            "loperamide for diarrhea (follow dosing instructions)",
            "oral rehydration salts to prevent dehydration",
        ],
    },
    // nausea
    SymptomCategory {
        trigger: Trigger::Contains(&["nausea", "nauseous"]),
        suggestions: &[
            "oral rehydration and small, bland meals; see pharmacist for anti-nausea options",
            "dimenhydrinate or meclizine (for motion sickness/vertigo - check with pharmacist)",
        ],
    },
    // vomiting
    SymptomCategory {
        trigger: Trigger::Contains(&["vomit"]),
        suggestions: &[
            "small sips of oral rehydration; seek pharmacist advice for antiemetics (dimenhydrinate/meclizine)",
        ],
    },
    // constipation
    SymptomCategory {
        trigger: Trigger::Contains(&["constip", "hard stool"]),
        suggestions: &[
            "increase dietary fiber and fluids; consider bulk-forming fiber or polyethylene glycol (osmotic laxative)",
            "short-term stimulant laxatives (senna, bisacodyl) or stool softeners (docusate) if required - check with pharmacist",
        ],
    },
    // heartburn
    SymptomCategory {
        trigger: Trigger::Contains(&["heartburn", "acid", "reflux"]),
        suggestions: &[
            "antacids (calcium carbonate) or H2 blockers - check with pharmacist for persistent symptoms",
        ],
    },
];

fn push_unique(out: &mut Vec<String>, item: &str) {
    if !out.iter().any(|existing| existing == item) {
        out.push(item.to_string());
    }
}

/// Suggests OTC remedies from advice text, falling back to symptom categories.
///
/// Terms named in the advice win outright. Otherwise every matching symptom
/// category contributes its suggestions. The result is never empty.
pub fn suggest(advice: &str, symptoms: &str) -> Vec<String> {
    let advice = advice.to_lowercase();
    let mut found = Vec::new();
    for term in VOCABULARY.iter().filter(|t| advice.contains(*t)) {
        push_unique(&mut found, term);
    }
    if !found.is_empty() {
        return found;
    }

    let symptoms = symptoms.to_lowercase();
    for category in CATEGORIES.iter().filter(|c| c.trigger.matches(&symptoms)) {
        for suggestion in category.suggestions {
            push_unique(&mut found, suggestion);
        }
    }
    if !found.is_empty() {
        return found;
    }

    DEFAULT_SUGGESTIONS.iter().map(|s| s.to_string()).collect()
}

/// Server suggestions when present, otherwise the heuristic.
pub fn resolve(assessment: &Assessment) -> Vec<String> {
    if !assessment.suggested_meds.is_empty() {
        return assessment.suggested_meds.clone();
    }
    suggest(&assessment.advice, &assessment.form.symptoms)
}
