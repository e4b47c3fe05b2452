//! Location keywords and the deterministic content tables keyed on them.
//!
//! Scene ids are free-form (`scene_005_basement`, `old_house_study`), so a
//! location is recovered by keyword. Every table has a general counterpart
//! that applies when no keyword matches.

use crate::narrative::ChoiceKind;
use crate::narrative::ChoiceKind::{Dialogue, Escape, General, Investigate, Movement, Recovery};

/// A fallback choice before it is given an id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChoiceTemplate {
    pub text: &'static str,
    pub kind: ChoiceKind,
}

macro_rules! t {
    ($text:expr, $kind:expr) => {
        ChoiceTemplate {
            text: $text,
            kind: $kind,
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Location {
    Entrance,
    LivingRoom,
    Kitchen,
    Study,
    Library,
    Basement,
    Upstairs,
    Room,
    Street,
    Forest,
    Unknown,
}

/// Keyword table, checked in order. More specific keywords come first.
const KEYWORDS: &[(&str, Location)] = &[
    ("entrance", Location::Entrance),
    ("foyer", Location::Entrance),
    ("hall", Location::Entrance),
    ("living", Location::LivingRoom),
    ("parlor", Location::LivingRoom),
    ("kitchen", Location::Kitchen),
    ("study", Location::Study),
    ("office", Location::Study),
    ("library", Location::Library),
    ("archive", Location::Library),
    ("basement", Location::Basement),
    ("cellar", Location::Basement),
    ("crypt", Location::Basement),
    ("upstairs", Location::Upstairs),
    ("attic", Location::Upstairs),
    ("bedroom", Location::Room),
    ("room", Location::Room),
    ("street", Location::Street),
    ("town", Location::Street),
    ("forest", Location::Forest),
    ("woods", Location::Forest),
];

const HORROR_KEYWORDS: &[&str] = &[
    "horror", "ritual", "occult", "cult", "basement", "cellar", "crypt", "tomb", "altar",
];

impl Location {
    /// Recover a location from a scene id.
    pub fn from_scene(scene_id: &str) -> Self {
        let scene = scene_id.to_lowercase();
        KEYWORDS
            .iter()
            .find(|(keyword, _)| scene.contains(keyword))
            .map(|(_, location)| *location)
            .unwrap_or(Location::Unknown)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Location::Entrance => "entrance",
            Location::LivingRoom => "living_room",
            Location::Kitchen => "kitchen",
            Location::Study => "study",
            Location::Library => "library",
            Location::Basement => "basement",
            Location::Upstairs => "upstairs",
            Location::Room => "room",
            Location::Street => "street",
            Location::Forest => "forest",
            Location::Unknown => "unknown",
        }
    }

    pub fn is_outdoor(self) -> bool {
        matches!(self, Location::Street | Location::Forest)
    }

    /// Primary fallback choices.
    pub fn choices(self) -> &'static [ChoiceTemplate] {
        match self {
            Location::Entrance => &[
                t!("Examine the heavy front door and its lock", Investigate),
                t!("Step into the darkened hallway", Movement),
                t!("Check the coat rack and umbrella stand", Investigate),
                t!("Call out to see if anyone is home", Dialogue),
            ],
            Location::LivingRoom => &[
                t!("Search the cushions of the faded sofa", Investigate),
                t!("Study the family portraits above the mantel", Investigate),
                t!("Sift through the ashes in the fireplace", Investigate),
                t!("Head toward the kitchen", Movement),
            ],
            Location::Kitchen => &[
                t!("Open the pantry", Investigate),
                t!("Inspect the stained knives on the counter", Investigate),
                t!("Look for the source of the rotten smell", Investigate),
                t!("Try the narrow door that leads downstairs", Movement),
            ],
            Location::Study => &[
                t!("Read the papers scattered across the desk", Investigate),
                t!("Search the desk drawers", Investigate),
                t!("Examine the locked cabinet", Investigate),
                t!("Leaf through the journal on the chair", Investigate),
            ],
            Location::Library => &[
                t!("Browse the shelves for occult titles", Investigate),
                t!("Check the card catalogue for recent loans", Investigate),
                t!("Ask the librarian about restricted volumes", Dialogue),
                t!("Read the marginal notes in an open tome", Investigate),
            ],
            Location::Basement => &[
                t!("Follow the scratching sound in the dark", Investigate),
                t!("Examine the symbols chalked on the floor", Investigate),
                t!("Inspect the rusted boiler", Investigate),
                t!("Retreat back up the stairs", Movement),
            ],
            Location::Upstairs => &[
                t!("Open the first bedroom door", Movement),
                t!("Listen at the end of the corridor", Investigate),
                t!("Look for a way into the attic", Movement),
                t!("Examine the damp patch on the ceiling", Investigate),
            ],
            Location::Room => &[
                t!("Search under the bed", Investigate),
                t!("Go through the wardrobe", Investigate),
                t!("Look out of the window", Investigate),
                t!("Check the nightstand drawer", Investigate),
            ],
            Location::Street => &[
                t!("Question a passerby about the house", Dialogue),
                t!("Look for footprints leading away", Investigate),
                t!("Visit the general store", Movement),
                t!("Watch the windows from across the street", Investigate),
            ],
            Location::Forest => &[
                t!("Follow the trail deeper into the trees", Movement),
                t!("Examine the carvings on an old oak", Investigate),
                t!("Listen for the source of the chanting", Investigate),
                t!("Mark your path back to the road", General),
            ],
            Location::Unknown => GENERAL_CHOICES,
        }
    }

    /// Choices rotated in when the primary ones were all offered recently.
    pub fn alternate_choices(self) -> &'static [ChoiceTemplate] {
        match self {
            Location::Entrance => &[
                t!("Light a match and study the wallpaper", Investigate),
                t!("Read the old mail piled by the door", Investigate),
                t!("Walk around to the back of the house", Movement),
            ],
            Location::LivingRoom => &[
                t!("Wind the silent grandfather clock", Investigate),
                t!("Look behind the heavy curtains", Investigate),
                t!("Climb the staircase to the upper floor", Movement),
            ],
            Location::Kitchen => &[
                t!("Check the ice box", Investigate),
                t!("Examine the scratches on the back door", Investigate),
                t!("Go back to the living room", Movement),
            ],
            Location::Study => &[
                t!("Look behind the framed map on the wall", Investigate),
                t!("Check the fireplace for burnt letters", Investigate),
                t!("Test the bookshelf for a hidden catch", Investigate),
            ],
            Location::Library => &[
                t!("Search the reading room for forgotten notes", Investigate),
                t!("Compare the tome against the catalogue entry", Investigate),
                t!("Leave for the street outside", Movement),
            ],
            Location::Basement => &[
                t!("Pry loose a damp brick in the wall", Investigate),
                t!("Search the shelves of dusty jars", Investigate),
                t!("Hold your breath and listen", Investigate),
            ],
            Location::Upstairs => &[
                t!("Check the bathroom mirror", Investigate),
                t!("Search the linen closet", Investigate),
                t!("Return downstairs", Movement),
            ],
            Location::Room => &[
                t!("Examine the pictures on the dresser", Investigate),
                t!("Check the floorboards for loose planks", Investigate),
                t!("Leave the room quietly", Movement),
            ],
            Location::Street => &[
                t!("Read the notices on the church board", Investigate),
                t!("Follow the man in the grey coat", Movement),
                t!("Ask at the post office about the owner", Dialogue),
            ],
            Location::Forest => &[
                t!("Search the clearing for a campfire", Investigate),
                t!("Climb a tree to get your bearings", Movement),
                t!("Examine the animal bones by the path", Investigate),
            ],
            Location::Unknown => GENERAL_ALTERNATES,
        }
    }

    /// Investigation leads specific to this location.
    pub fn leads(self) -> &'static [&'static str] {
        match self {
            Location::Entrance => &[
                "Fresh mud on the doormat",
                "A visiting card wedged in the door frame",
                "Scratches around the keyhole",
                "A coat still damp from the rain",
                "A faint draft from under the stairs",
                "A calendar stopped on the wrong month",
            ],
            Location::LivingRoom => &[
                "A portrait whose eyes have been scratched out",
                "Half-burnt letters in the grate",
                "A chair turned to face the wall",
                "A clock stopped at 3:17",
                "A music box with a strange melody",
                "An indentation in the carpet where something stood",
            ],
            Location::Kitchen => &[
                "A meal left half eaten",
                "Salt poured in a line across the threshold",
                "A cleaver with dark residue",
                "Tins stacked as if for a long siege",
                "Wet footprints leading to the cellar door",
                "A shopping list in an unfamiliar script",
            ],
            Location::Study => &[
                "A diary with the last pages torn out",
                "A letter from Miskatonic University",
                "A map with circled coastal towns",
                "An astronomical chart annotated in red ink",
                "A locked drawer with fresh scratches",
                "A receipt from an Arkham bookseller",
            ],
            Location::Library => &[
                "A loan slip signed by a missing professor",
                "A gap on the shelf where a tome should be",
                "Pencil notes in a dead language",
                "A catalogue card filed under the wrong subject",
                "A reading lamp still warm",
                "A ribbon marking a passage about the stars",
            ],
            Location::Basement => &[
                "A chalk circle with symbols you do not recognise",
                "A heartbeat-like thumping behind the wall",
                "Candles burnt down to stubs",
                "A trapdoor sealed with iron nails",
                "Claw marks on the bottom step",
                "A smell of brine far from the sea",
            ],
            Location::Upstairs => &[
                "A door locked from the inside",
                "A trail of water along the corridor",
                "A child's drawing of a tall thin man",
                "A mirror covered with a sheet",
                "Footsteps in the attic above",
                "A bed that has not been slept in",
            ],
            Location::Room => &[
                "A suitcase packed in haste",
                "A photograph with one face cut out",
                "A prayer book open to a funeral rite",
                "Scratched tally marks on the wall",
                "A window nailed shut",
                "An unsent telegram",
            ],
            Location::Street => &[
                "Townsfolk who stop talking as you pass",
                "A newspaper report of a drowning",
                "A shop that closed suddenly last week",
                "Strange symbols painted on a lamp post",
                "A dog that will not go near the house",
                "A stranger asking the same questions as you",
            ],
            Location::Forest => &[
                "A ring of stones in a clearing",
                "Trees marked with an unfamiliar sigil",
                "A silence where birdsong should be",
                "Tracks that end abruptly",
                "A torn piece of robe caught on a branch",
                "Lights moving between the trunks",
            ],
            Location::Unknown => &[],
        }
    }

    /// Short scene-setting text for an opening beat.
    pub fn opening_text(self) -> &'static str {
        match self {
            Location::Entrance => {
                "You stand before the old house. The door is unlocked, and the hallway beyond smells of dust and something sweeter, like rot."
            }
            Location::LivingRoom => {
                "Sheets cover most of the furniture. The fireplace is cold, yet the room feels recently occupied."
            }
            Location::Kitchen => {
                "The kitchen is cramped and dim. Something drips steadily in the dark beneath the sink."
            }
            Location::Study => {
                "Books and papers are piled on every surface. Whoever worked here left in a hurry."
            }
            Location::Library => {
                "The reading room is hushed. Lamps cast small islands of light between tall shelves."
            }
            Location::Basement => {
                "The stairs creak as you descend. The air is cold and thick with the smell of damp earth."
            }
            Location::Upstairs => {
                "A narrow corridor stretches ahead. Every door along it is closed."
            }
            Location::Room => "The room is small and still. The curtains are drawn.",
            Location::Street => {
                "The town is quiet under a grey sky. Curtains twitch as you pass."
            }
            Location::Forest => {
                "The path narrows among black trees. The light is failing faster than it should."
            }
            Location::Unknown => {
                "You take stock of your surroundings. Something here is not as it should be."
            }
        }
    }
}

/// Choices that apply anywhere.
pub const GENERAL_CHOICES: &[ChoiceTemplate] = &[
    t!("Look around carefully", Investigate),
    t!("Search for anything out of place", Investigate),
    t!("Listen closely for any sound", Investigate),
    t!("Move on to another area", Movement),
];

pub const GENERAL_ALTERNATES: &[ChoiceTemplate] = &[
    t!("Review your notes so far", General),
    t!("Wait and observe in silence", General),
    t!("Retrace your steps", Movement),
    t!("Consider what you have learned", General),
];

/// Offered when sanity or hit points run low.
pub const RECOVERY_CHOICES: &[ChoiceTemplate] = &[
    t!("Take a moment to steady your nerves", Recovery),
    t!("Find a safe corner to rest and tend your wounds", Recovery),
];

/// Offered at terrifying tension or worse.
pub const ESCAPE_CHOICES: &[ChoiceTemplate] = &[
    t!("Flee back the way you came", Escape),
    t!("Hide and wait for the danger to pass", Escape),
];

/// Last resort when every other template was filtered out.
pub const ULTIMATE_FALLBACK: ChoiceTemplate = t!("Continue exploring", General);

/// Leads that apply anywhere.
pub const GENERAL_LEADS: &[&str] = &[
    "Look for anything that seems out of place",
    "Check the floor for anything dropped",
    "Inspect the walls for hidden seams",
    "Search for a concealed passage or door",
    "Trace the source of a strange smell",
    "Note who else might have been here recently",
    "Look for signs of a struggle",
    "Search for documents or letters",
];

/// Leads added in horror-adjacent scenes.
pub const HORROR_LEADS: &[&str] = &[
    "Investigate the cause of the unnatural phenomenon",
    "Decipher the occult symbols",
    "Analyse the pattern of the strange sounds",
    "Track the traces of something inhuman",
    "Study the forbidden text more closely",
    "Search for evidence of a recent ritual",
];

/// Whether a scene is horror-adjacent.
pub fn is_horror_scene(scene_id: &str) -> bool {
    let scene = scene_id.to_lowercase();
    HORROR_KEYWORDS.iter().any(|k| scene.contains(k))
}

/// All deterministic leads for a scene, most specific first.
pub fn leads_for_scene(scene_id: &str) -> Vec<&'static str> {
    let location = Location::from_scene(scene_id);
    let mut leads: Vec<&'static str> = location.leads().to_vec();
    if is_horror_scene(scene_id) {
        leads.extend_from_slice(HORROR_LEADS);
    }
    leads.extend_from_slice(GENERAL_LEADS);
    leads
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_location_from_scene() {
        assert_eq!(Location::from_scene("scene_001_entrance"), Location::Entrance);
        assert_eq!(Location::from_scene("scene_002_living_room"), Location::LivingRoom);
        assert_eq!(Location::from_scene("scene_005_basement"), Location::Basement);
        assert_eq!(Location::from_scene("scene_004_upstairs"), Location::Upstairs);
        assert_eq!(Location::from_scene("Miskatonic_Library"), Location::Library);
        assert_eq!(Location::from_scene("scene_999"), Location::Unknown);
    }

    #[test]
    fn test_horror_scene() {
        assert!(is_horror_scene("scene_005_basement"));
        assert!(is_horror_scene("cult_ritual_site"));
        assert!(!is_horror_scene("scene_004_study"));
    }

    #[test]
    fn test_tables_have_distinct_text() {
        let all = [
            Location::Entrance,
            Location::LivingRoom,
            Location::Kitchen,
            Location::Study,
            Location::Library,
            Location::Basement,
            Location::Upstairs,
            Location::Room,
            Location::Street,
            Location::Forest,
            Location::Unknown,
        ];
        for location in all {
            let texts: Vec<_> = location
                .choices()
                .iter()
                .chain(location.alternate_choices())
                .map(|c| c.text)
                .collect();
            let unique: HashSet<_> = texts.iter().collect();
            assert_eq!(unique.len(), texts.len(), "{location:?}");
            assert!(!location.choices().is_empty());
        }
    }

    #[test]
    fn test_lead_pool_is_large_enough() {
        for scene in ["scene_004_study", "scene_005_basement", "somewhere"] {
            let leads = leads_for_scene(scene);
            let unique: HashSet<_> = leads.iter().collect();
            assert_eq!(unique.len(), leads.len());
            assert!(leads.len() >= 8);
        }
    }
}
