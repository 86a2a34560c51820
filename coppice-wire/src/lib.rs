mod mutation;
mod state;
mod transport;
mod value;

pub use mutation::{
    decode_mutation_block, decode_token_assignments, encode_mutation_block,
    encode_token_assignments, MutationCommand, TokenAssignment,
};
pub use state::{decode_node_states, encode_node_state, ChildRef, NodeState, PropertyState};
pub use transport::{LineReader, Transport};
pub use value::{decode_value, encode_binary_tag, encode_value};
