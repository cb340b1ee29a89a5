// Cadenza
// Copyright (c) 2019-2022 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `huffman` module provides a binary Huffman decoding tree.

/// A slot in the decoding tree. Every tree node has two slots, one per bit value.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Node {
    /// No code continues with this bit.
    Empty,
    /// The code continues at the node with the given index.
    Branch(usize),
    /// The code is complete and decodes to the given value.
    Leaf(u16),
}

/// A `HuffmanTree` maps variable-length, prefix-free codes to values.
///
/// The tree is built once from a codebook given as parallel lists of codes, code lengths, and
/// values, and is then walked one bit at a time by [`ReadBitsLtr::read_code`].
///
/// [`ReadBitsLtr::read_code`]: crate::io::ReadBitsLtr::read_code
#[derive(Clone, Debug)]
pub struct HuffmanTree {
    nodes: Vec<[Node; 2]>,
}

impl HuffmanTree {
    /// Builds a tree from a codebook. Codes are right-aligned in `codes`, with their lengths in
    /// bits given by `lens`. Entries with a length of 0 are unused and skipped.
    ///
    /// Panics if the lists differ in length, or if the codebook is not prefix-free.
    pub fn new(codes: &[u32], lens: &[u8], values: &[u16]) -> Self {
        assert_eq!(codes.len(), lens.len());
        assert_eq!(codes.len(), values.len());

        let mut nodes = vec![[Node::Empty; 2]];

        for ((&code, &len), &value) in codes.iter().zip(lens).zip(values) {
            assert!(len <= 32, "code length exceeds 32 bits");

            let mut node = 0;

            for i in (0..u32::from(len)).rev() {
                let bit = ((code >> i) & 1) as usize;

                if i == 0 {
                    assert_eq!(nodes[node][bit], Node::Empty, "codebook is not prefix-free");
                    nodes[node][bit] = Node::Leaf(value);
                    break;
                }

                node = match nodes[node][bit] {
                    Node::Branch(next) => next,
                    Node::Empty => {
                        let next = nodes.len();
                        nodes.push([Node::Empty; 2]);
                        nodes[node][bit] = Node::Branch(next);
                        next
                    }
                    Node::Leaf(_) => panic!("codebook is not prefix-free"),
                };
            }
        }

        HuffmanTree { nodes }
    }

    /// Returns true if the tree decodes no codes at all.
    pub fn is_empty(&self) -> bool {
        self.nodes[0] == [Node::Empty; 2]
    }

    #[inline(always)]
    pub(crate) fn child(&self, node: usize, bit: bool) -> Node {
        self.nodes[node][usize::from(bit)]
    }
}
